//! Directory loaded from a YAML file.
//!
//! ```yaml
//! users:
//!   - id: 7d3c1d1e-5f1c-4d7e-9a55-0c4d3b2a1f00
//!     email: parent@example.school
//!     display_name: Pat Parent
//!     role: guardian
//!     password: correct-horse      # hashed at load; or supply password_hash
//! students:
//!   - id: 0b7f3a52-2c4e-4f7b-8d1a-6e5c4b3a2d10
//!     name: Sam Student
//!     class_name: 3B
//! guardianships:
//!   - student_id: 0b7f3a52-2c4e-4f7b-8d1a-6e5c4b3a2d10
//!     guardian_id: 7d3c1d1e-5f1c-4d7e-9a55-0c4d3b2a1f00
//!     relationship: parent
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::Deserialize;

use super::{Directory, DirectoryUser, Guardianship, Role, Student};
use crate::auth::password::{Argon2Params, hash_password};
use crate::db::errors::Result;
use crate::types::{StudentId, UserId};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureUser {
    id: UserId,
    email: String,
    display_name: String,
    role: Role,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    password_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureGuardianship {
    student_id: StudentId,
    guardian_id: UserId,
    relationship: String,
    #[serde(default = "default_can_pickup")]
    can_pickup: bool,
}

fn default_can_pickup() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Fixture {
    users: Vec<FixtureUser>,
    students: Vec<Student>,
    guardianships: Vec<FixtureGuardianship>,
}

/// Immutable in-process directory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: HashMap<UserId, DirectoryUser>,
    users_by_email: HashMap<String, UserId>,
    students: HashMap<StudentId, Student>,
    guardianships: Vec<Guardianship>,
}

impl StaticDirectory {
    /// Load and validate a fixture file. Plaintext passwords are hashed with `params`.
    pub fn load(path: &Path, params: Argon2Params) -> anyhow::Result<Self> {
        let fixture: Fixture = Figment::from(Yaml::file(path))
            .extract()
            .with_context(|| format!("failed to read directory fixture {}", path.display()))?;

        let mut directory = Self::default();
        for user in fixture.users {
            let password_hash = match (user.password, user.password_hash) {
                (Some(_), Some(_)) => anyhow::bail!("user {} has both password and password_hash", user.email),
                (Some(plain), None) => Some(hash_password(&plain, params).map_err(|e| anyhow::anyhow!("{e:#}"))?),
                (None, hash) => hash,
            };
            directory.insert_user(DirectoryUser {
                id: user.id,
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                password_hash,
            })?;
        }
        for student in fixture.students {
            directory.insert_student(student);
        }
        for g in fixture.guardianships {
            directory.insert_guardianship(Guardianship {
                student_id: g.student_id,
                guardian_id: g.guardian_id,
                relationship: g.relationship,
                can_pickup: g.can_pickup,
            })?;
        }

        tracing::info!(
            users = directory.users.len(),
            students = directory.students.len(),
            guardianships = directory.guardianships.len(),
            "Loaded directory fixture from {}",
            path.display()
        );
        Ok(directory)
    }

    pub fn insert_user(&mut self, user: DirectoryUser) -> anyhow::Result<()> {
        let key = user.email.to_lowercase();
        if self.users_by_email.contains_key(&key) {
            anyhow::bail!("duplicate directory email {}", user.email);
        }
        self.users_by_email.insert(key, user.id);
        self.users.insert(user.id, user);
        Ok(())
    }

    pub fn insert_student(&mut self, student: Student) {
        self.students.insert(student.id, student);
    }

    pub fn insert_guardianship(&mut self, guardianship: Guardianship) -> anyhow::Result<()> {
        if !self.students.contains_key(&guardianship.student_id) {
            anyhow::bail!("guardianship references unknown student {}", guardianship.student_id);
        }
        match self.users.get(&guardianship.guardian_id) {
            Some(user) if user.role == Role::Guardian => {}
            Some(user) => anyhow::bail!("guardianship references {} who is not a guardian", user.email),
            None => anyhow::bail!("guardianship references unknown user {}", guardianship.guardian_id),
        }
        self.guardianships.retain(|g| {
            !(g.student_id == guardianship.student_id && g.guardian_id == guardianship.guardian_id)
        });
        self.guardianships.push(guardianship);
        Ok(())
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<DirectoryUser>> {
        Ok(self.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>> {
        Ok(self
            .users_by_email
            .get(&email.to_lowercase())
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>> {
        Ok(self.students.get(&id).cloned())
    }

    async fn guardianships_for_student(&self, student_id: StudentId) -> Result<Vec<Guardianship>> {
        Ok(self
            .guardianships
            .iter()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<DirectoryUser>> {
        Ok(self.users.values().filter(|u| u.role == role).cloned().collect())
    }
}
