//! Directory backed by the `users`, `students` and `guardianships` tables.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::{Directory, DirectoryUser, Guardianship, Role, Student};
use crate::db::errors::Result;
use crate::types::{StudentId, UserId, abbrev_uuid};

#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PostgresDirectory {
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<DirectoryUser>> {
        Ok(
            sqlx::query_as::<_, DirectoryUser>("SELECT id, email, display_name, role, password_hash FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>> {
        Ok(sqlx::query_as::<_, DirectoryUser>(
            "SELECT id, email, display_name, role, password_hash FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self), fields(student_id = %abbrev_uuid(&id)), err)]
    async fn get_student(&self, id: StudentId) -> Result<Option<Student>> {
        Ok(
            sqlx::query_as::<_, Student>("SELECT id, name, class_name, default_pickup_person FROM students WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self), fields(student_id = %abbrev_uuid(&student_id)), err)]
    async fn guardianships_for_student(&self, student_id: StudentId) -> Result<Vec<Guardianship>> {
        Ok(sqlx::query_as::<_, Guardianship>(
            "SELECT student_id, guardian_id, relationship, can_pickup FROM guardianships WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self), err)]
    async fn users_with_role(&self, role: Role) -> Result<Vec<DirectoryUser>> {
        Ok(sqlx::query_as::<_, DirectoryUser>(
            "SELECT id, email, display_name, role, password_hash FROM users WHERE role = $1 ORDER BY email",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_authorized_guardians_from_tables(pool: PgPool) {
        let parent = Uuid::new_v4();
        let aunt = Uuid::new_v4();
        let student = Uuid::new_v4();

        for (id, email) in [(parent, "parent@example.school"), (aunt, "aunt@example.school")] {
            sqlx::query("INSERT INTO users (id, email, display_name, role) VALUES ($1, $2, 'x', 'guardian')")
                .bind(id)
                .bind(email)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query("INSERT INTO students (id, name) VALUES ($1, 'Sam')")
            .bind(student)
            .execute(&pool)
            .await
            .unwrap();
        for (guardian, can_pickup) in [(parent, true), (aunt, false)] {
            sqlx::query("INSERT INTO guardianships (student_id, guardian_id, relationship, can_pickup) VALUES ($1, $2, 'family', $3)")
                .bind(student)
                .bind(guardian)
                .bind(can_pickup)
                .execute(&pool)
                .await
                .unwrap();
        }

        let directory = PostgresDirectory::new(pool);
        assert_eq!(directory.authorized_guardians(student).await.unwrap(), vec![parent]);
        assert!(
            directory
                .find_user_by_email("PARENT@example.school")
                .await
                .unwrap()
                .is_some()
        );
    }
}
