//! Credential verification.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error as ThisError;

use super::password::verify_password;
use crate::directory::{Directory, Role};
use crate::types::UserId;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Who the credentials belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(ThisError, Debug)]
pub enum VerifyError {
    /// Unknown identity, wrong password, or an account without a password. The caller cannot
    /// tell which.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Claims, VerifyError>;
}

/// Checks passwords against the Argon2 hashes held in the directory.
pub struct DirectoryVerifier {
    directory: Arc<dyn Directory>,
}

impl DirectoryVerifier {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl IdentityVerifier for DirectoryVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Claims, VerifyError> {
        let user = self
            .directory
            .find_user_by_email(credentials.email.trim())
            .await
            .map_err(|e| VerifyError::Unavailable(anyhow::Error::from(e)))?
            .ok_or(VerifyError::InvalidCredentials)?;

        let Some(hash) = user.password_hash.clone() else {
            return Err(VerifyError::InvalidCredentials);
        };

        // Argon2 verification is CPU-bound
        let password = credentials.password.clone();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| VerifyError::Unavailable(anyhow::anyhow!("password verification task failed: {e}")))?
            .map_err(|e| VerifyError::Unavailable(anyhow::anyhow!("{e:#}")))?;

        if !valid {
            return Err(VerifyError::InvalidCredentials);
        }

        Ok(Claims {
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{Argon2Params, hash_password};
    use crate::directory::DirectoryUser;
    use crate::directory::fixture::StaticDirectory;
    use uuid::Uuid;

    fn verifier() -> (DirectoryVerifier, UserId) {
        let mut directory = StaticDirectory::default();
        let id = Uuid::new_v4();
        directory
            .insert_user(DirectoryUser {
                id,
                email: "guard@example.school".to_string(),
                display_name: "Gate Guard".to_string(),
                role: Role::Guard,
                password_hash: Some(hash_password("open-sesame", Argon2Params::fast()).unwrap()),
            })
            .unwrap();
        directory
            .insert_user(DirectoryUser {
                id: Uuid::new_v4(),
                email: "nopass@example.school".to_string(),
                display_name: "No Password".to_string(),
                role: Role::Teacher,
                password_hash: None,
            })
            .unwrap();
        (DirectoryVerifier::new(Arc::new(directory)), id)
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_verify_password() {
        let (verifier, id) = verifier();
        let claims = verifier.verify(&creds("Guard@Example.School", "open-sesame")).await.unwrap();
        assert_eq!(claims.user_id, id);
        assert_eq!(claims.role, Role::Guard);
    }

    #[tokio::test]
    async fn test_failures_are_indistinguishable() {
        let (verifier, _) = verifier();
        for (email, password) in [
            ("guard@example.school", "wrong"),
            ("nobody@example.school", "open-sesame"),
            ("nopass@example.school", ""),
        ] {
            assert!(matches!(
                verifier.verify(&creds(email, password)).await,
                Err(VerifyError::InvalidCredentials)
            ));
        }
    }
}
