//! Read-only view of students, guardianships and user accounts.
//!
//! The workflow never writes directory records. Two sources exist: a YAML fixture loaded at
//! startup ([`fixture::StaticDirectory`]) and the `users`/`students`/`guardianships` tables
//! ([`postgres::PostgresDirectory`]).

pub mod fixture;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::errors::Result;
use crate::types::{StudentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guardian,
    Teacher,
    Admin,
    /// Gate or front-desk staff who hand children over
    Guard,
}

impl Role {
    /// May confirm or reject requests and raise requests for any student
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    /// May verify tokens and release children
    pub fn can_release(&self) -> bool {
        matches!(self, Role::Guard | Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryUser {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    /// PHC-format Argon2 hash; accounts without one cannot log in
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Student {
    #[schema(value_type = String, format = "uuid")]
    pub id: StudentId,
    pub name: String,
    pub class_name: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub default_pickup_person: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Guardianship {
    #[schema(value_type = String, format = "uuid")]
    pub student_id: StudentId,
    #[schema(value_type = String, format = "uuid")]
    pub guardian_id: UserId,
    pub relationship: String,
    pub can_pickup: bool,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<DirectoryUser>>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>>;

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>>;

    async fn guardianships_for_student(&self, student_id: StudentId) -> Result<Vec<Guardianship>>;

    async fn users_with_role(&self, role: Role) -> Result<Vec<DirectoryUser>>;

    /// Guardians allowed to collect the student.
    async fn authorized_guardians(&self, student_id: StudentId) -> Result<Vec<UserId>> {
        Ok(self
            .guardianships_for_student(student_id)
            .await?
            .into_iter()
            .filter(|g| g.can_pickup)
            .map(|g| g.guardian_id)
            .collect())
    }

    async fn is_authorized_guardian(&self, student_id: StudentId, user_id: UserId) -> Result<bool> {
        Ok(self.authorized_guardians(student_id).await?.contains(&user_id))
    }
}
