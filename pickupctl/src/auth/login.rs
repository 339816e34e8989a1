//! Login and logout.
//!
//! The lockout check runs before credentials are looked at, so a locked identity learns nothing
//! from further guesses. Unknown identities are counted exactly like known ones.

use std::sync::Arc;

use tracing::instrument;

use super::identity::{Claims, Credentials, IdentityVerifier, VerifyError};
use super::lockout::{LockStatus, LockoutGuard, normalize_identity};
use super::session::{IssuedSession, SessionMetadata, SessionRegistry};
use crate::audit::{Actor, AuditTrail};
use crate::clock::Clock;
use crate::db::models::audit::{AuditAction, NewAuditEntry, SubjectType};
use crate::errors::{Error, Result};
use crate::types::SessionId;

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub claims: Claims,
    pub issued: IssuedSession,
}

#[derive(Clone)]
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
    lockout: LockoutGuard,
    sessions: SessionRegistry,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        lockout: LockoutGuard,
        sessions: SessionRegistry,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            lockout,
            sessions,
            audit,
            clock,
        }
    }

    #[instrument(skip_all, err)]
    pub async fn login(&self, credentials: &Credentials, metadata: SessionMetadata) -> Result<LoginOutcome> {
        let identity = normalize_identity(&credentials.email);

        let status = self.lockout.status(&identity).await?;
        if let Some(retry_after_secs) = status.retry_after_secs(self.clock.now()) {
            return Err(Error::Locked { retry_after_secs });
        }

        let claims = match self.verifier.verify(credentials).await {
            Ok(claims) => claims,
            Err(VerifyError::InvalidCredentials) => {
                let status = self.lockout.record_failure(&identity, &metadata.origin).await?;
                return Err(match status {
                    LockStatus::Locked { .. } => Error::Locked {
                        retry_after_secs: status.retry_after_secs(self.clock.now()).unwrap_or(0),
                    },
                    LockStatus::Warning { remaining } => Error::Unauthenticated {
                        message: Some(format!(
                            "Invalid email or password. {remaining} attempt(s) remaining before the account is locked"
                        )),
                    },
                    LockStatus::Clear => Error::Unauthenticated {
                        message: Some("Invalid email or password".to_string()),
                    },
                });
            }
            Err(VerifyError::Unavailable(e)) => return Err(Error::Other(e)),
        };

        self.lockout.record_success(&identity).await?;
        let origin = metadata.origin.clone();
        let issued = self.sessions.issue(claims.user_id, metadata).await?;

        self.audit
            .record(
                NewAuditEntry::builder()
                    .actor_id(claims.user_id)
                    .action(AuditAction::Login)
                    .subject_type(SubjectType::Session)
                    .subject_id(issued.session.id.to_string())
                    .description(format!("{} signed in", claims.email))
                    .origin(origin)
                    .build(),
            )
            .await;

        tracing::info!(user_id = %claims.user_id, role = ?claims.role, "Login succeeded");
        Ok(LoginOutcome { claims, issued })
    }

    pub async fn logout(&self, session_id: SessionId, actor: &Actor) -> Result<()> {
        self.sessions.end(session_id, actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::DirectoryVerifier;
    use crate::auth::password::{Argon2Params, hash_password};
    use crate::clock::ManualClock;
    use crate::config::{LockoutConfig, SessionConfig};
    use crate::db::in_memory::InMemoryStore;
    use crate::db::models::audit::AuditFilter;
    use crate::db::store::Store;
    use crate::directory::fixture::StaticDirectory;
    use crate::directory::{DirectoryUser, Role};
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        auth: Authenticator,
        audit: AuditTrail,
        sessions: SessionRegistry,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let audit = AuditTrail::new(store.clone(), clock.clone());

        let mut directory = StaticDirectory::default();
        directory
            .insert_user(DirectoryUser {
                id: Uuid::new_v4(),
                email: "pat@example.school".to_string(),
                display_name: "Pat Parent".to_string(),
                role: Role::Guardian,
                password_hash: Some(hash_password("correct-horse", Argon2Params::fast()).unwrap()),
            })
            .unwrap();

        let lockout = LockoutGuard::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            &LockoutConfig {
                max_failed_attempts: 5,
                lock_duration: Duration::from_secs(15 * 60),
            },
        );
        let sessions = SessionRegistry::new(
            store,
            audit.clone(),
            clock.clone(),
            &SessionConfig {
                timeout: Duration::from_secs(3600),
            },
        );
        let auth = Authenticator::new(
            Arc::new(DirectoryVerifier::new(Arc::new(directory))),
            lockout,
            sessions.clone(),
            audit.clone(),
            clock.clone(),
        );
        Fixture {
            auth,
            audit,
            sessions,
            clock,
        }
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_login_issues_session() {
        let f = fixture();
        let outcome = f
            .auth
            .login(&creds("pat@example.school", "correct-horse"), SessionMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.claims.role, Role::Guardian);

        let session = f.sessions.validate(&outcome.issued.token).await.unwrap();
        assert_eq!(session.user_id, outcome.claims.user_id);

        let actor = Actor::new(outcome.claims.user_id, Role::Guardian);
        f.auth.logout(session.id, &actor).await.unwrap();
        assert!(f.sessions.validate(&outcome.issued.token).await.is_err());

        let actions: Vec<_> = f
            .audit
            .query(&AuditFilter {
                actor_id: Some(actor.id),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&AuditAction::Login));
        assert!(actions.contains(&AuditAction::Logout));
    }

    #[tokio::test]
    async fn test_lockout_scenario() {
        let f = fixture();

        for remaining in (1..=4).rev() {
            let err = f
                .auth
                .login(&creds("pat@example.school", "wrong"), SessionMetadata::default())
                .await
                .unwrap_err();
            match err {
                Error::Unauthenticated { message: Some(message) } => {
                    assert!(message.contains(&format!("{remaining} attempt(s) remaining")), "{message}")
                }
                other => panic!("expected Unauthenticated, got {other:?}"),
            }
        }

        // Fifth failure locks
        let err = f
            .auth
            .login(&creds("pat@example.school", "wrong"), SessionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked { retry_after_secs: 900 }));

        // While locked even the correct password is refused
        let err = f
            .auth
            .login(&creds("pat@example.school", "correct-horse"), SessionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));

        // After the lock lapses the right password works and the count resets
        f.clock.advance(chrono::Duration::minutes(16));
        f.auth
            .login(&creds("pat@example.school", "correct-horse"), SessionMetadata::default())
            .await
            .unwrap();
        let err = f
            .auth
            .login(&creds("pat@example.school", "wrong"), SessionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { message: Some(m) } if m.contains("4 attempt(s)")));
    }

    #[tokio::test]
    async fn test_unknown_identity_counts_the_same() {
        let f = fixture();
        for _ in 0..5 {
            let _ = f
                .auth
                .login(&creds("ghost@example.school", "anything"), SessionMetadata::default())
                .await;
        }
        assert!(matches!(
            f.auth
                .login(&creds("ghost@example.school", "anything"), SessionMetadata::default())
                .await,
            Err(Error::Locked { .. })
        ));
    }
}
