//! Test utilities for HTTP-level tests.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

use crate::auth::password::{Argon2Params, hash_password};
use crate::clock::ManualClock;
use crate::config::{Config, CorsOrigin, DirectoryConfig, PasswordConfig};
use crate::db::in_memory::InMemoryStore;
use crate::directory::fixture::StaticDirectory;
use crate::directory::{DirectoryUser, Guardianship, Role, Student};
use crate::notify::testing::RecordingNotifier;
use crate::types::{StudentId, UserId};
use crate::{AppState, build_router};

pub const PASSWORD: &str = "correct-horse-battery";

pub fn create_test_config() -> Config {
    let fast = Argon2Params::fast();
    let mut config = Config {
        secret_key: Some("test-secret-key-for-pickup-tokens".to_string()),
        enable_metrics: false,
        ..Default::default()
    };
    config.auth.password = PasswordConfig {
        argon2_memory_kib: fast.memory_kib,
        argon2_iterations: fast.iterations,
        argon2_parallelism: fast.parallelism,
    };
    config.auth.lockout.max_failed_attempts = 3;
    config.auth.security.cors.allowed_origins = vec![CorsOrigin::Url(Url::parse("http://localhost:5173").unwrap())];
    config
}

/// A test config whose directory is a YAML fixture in a temp dir. Keep the dir alive.
pub fn test_config_with_fixture() -> (Config, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("directory.yaml");
    let guardian = Uuid::new_v4();
    let student = Uuid::new_v4();
    std::fs::write(
        &path,
        format!(
            r#"
users:
  - id: {guardian}
    email: parent@example.school
    display_name: Pat Parent
    role: guardian
    password: {PASSWORD}
students:
  - id: {student}
    name: Sam Student
    class_name: 3B
guardianships:
  - student_id: {student}
    guardian_id: {guardian}
    relationship: parent
"#
        ),
    )
    .unwrap();

    let mut config = create_test_config();
    config.directory = DirectoryConfig::File { path };
    (config, dir)
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: UserId,
    pub email: String,
    pub role: Role,
}

/// The full router over an in-memory store, a manual clock and a recording notifier.
///
/// One student, two guardians who may collect them, one unrelated guardian, and one of each
/// staff role. Everyone's password is [`PASSWORD`].
pub struct TestApp {
    pub state: AppState,
    pub server: TestServer,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub student: StudentId,
    pub parent: TestUser,
    pub second_guardian: TestUser,
    pub stranger: TestUser,
    pub teacher: TestUser,
    pub admin: TestUser,
    pub guard: TestUser,
}

fn add_user(directory: &mut StaticDirectory, hash: &str, name: &str, role: Role) -> TestUser {
    let user = TestUser {
        id: Uuid::new_v4(),
        email: format!("{}@example.school", name.to_lowercase().replace(' ', ".")),
        role,
    };
    directory
        .insert_user(DirectoryUser {
            id: user.id,
            email: user.email.clone(),
            display_name: name.to_string(),
            role,
            password_hash: Some(hash.to_string()),
        })
        .unwrap();
    user
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let hash = hash_password(PASSWORD, Argon2Params::fast()).unwrap();
        let mut directory = StaticDirectory::default();

        let student = Uuid::new_v4();
        directory.insert_student(Student {
            id: student,
            name: "Sam Student".to_string(),
            class_name: Some("3B".to_string()),
            default_pickup_person: None,
        });

        let parent = add_user(&mut directory, &hash, "Pat Parent", Role::Guardian);
        let second_guardian = add_user(&mut directory, &hash, "Gus Guardian", Role::Guardian);
        let stranger = add_user(&mut directory, &hash, "Stan Stranger", Role::Guardian);
        let teacher = add_user(&mut directory, &hash, "Terry Teacher", Role::Teacher);
        let admin = add_user(&mut directory, &hash, "Ada Admin", Role::Admin);
        let guard = add_user(&mut directory, &hash, "Gate Guard", Role::Guard);

        for (guardian, relationship) in [(&parent, "parent"), (&second_guardian, "grandparent")] {
            directory
                .insert_guardianship(Guardianship {
                    student_id: student,
                    guardian_id: guardian.id,
                    relationship: relationship.to_string(),
                    can_pickup: true,
                })
                .unwrap();
        }

        let clock = Arc::new(ManualClock::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::wire(
            Arc::new(config),
            Arc::new(InMemoryStore::new()),
            Arc::new(directory),
            clock.clone(),
            notifier.clone(),
        )
        .unwrap();

        let server = TestServer::new(build_router(&state).unwrap()).unwrap();

        Self {
            state,
            server,
            clock,
            notifier,
            student,
            parent,
            second_guardian,
            stranger,
            teacher,
            admin,
            guard,
        }
    }

    /// Log in and return the bearer token.
    pub async fn login(&self, user: &TestUser) -> String {
        let response = self
            .server
            .post("/api/v1/authentication/login")
            .json(&serde_json::json!({ "email": user.email, "password": PASSWORD }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["token"].as_str().unwrap().to_string()
    }
}
