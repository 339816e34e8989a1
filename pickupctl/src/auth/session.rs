//! Opaque bearer sessions.
//!
//! A session token is 32 random bytes, base64url encoded, handed to the client once at login.
//! Only its SHA-256 digest is stored. Sessions have an absolute expiry; activity refreshes
//! `last_activity_at` but never extends the session.

use std::sync::Arc;

use tracing::instrument;

use crate::audit::{Actor, AuditTrail};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::crypto::{generate_secret_token, sha256_hex};
use crate::db::models::audit::{AuditAction, NewAuditEntry, Origin, SubjectType};
use crate::db::models::sessions::Session;
use crate::db::store::Store;
use crate::directory::Role;
use crate::errors::{Error, Result};
use crate::types::{SessionId, UserId, abbrev_uuid};

/// Client details recorded against a new session
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub device_label: Option<String>,
    pub origin: Origin,
}

/// A freshly issued session and the only copy of its bearer token
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    timeout: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, audit: AuditTrail, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            store,
            audit,
            clock,
            timeout: chrono::Duration::from_std(config.timeout).unwrap_or(chrono::Duration::hours(12)),
        }
    }

    #[instrument(skip(self, metadata), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn issue(&self, user_id: UserId, metadata: SessionMetadata) -> Result<IssuedSession> {
        let now = self.clock.now();
        let token = generate_secret_token();
        let session = Session {
            id: uuid::Uuid::new_v4(),
            token_hash: sha256_hex(&token),
            user_id,
            issued_at: now,
            expires_at: now + self.timeout,
            last_activity_at: now,
            revoked_at: None,
            revoke_reason: None,
            device_label: metadata.device_label,
            user_agent: metadata.origin.user_agent,
            ip_address: metadata.origin.ip_address,
        };
        self.store.insert_session(&session).await?;
        Ok(IssuedSession { token, session })
    }

    /// Resolve a bearer token to a live session.
    pub async fn validate(&self, token: &str) -> Result<Session> {
        let now = self.clock.now();
        let session = self
            .store
            .find_session_by_token_hash(&sha256_hex(token))
            .await?
            .ok_or(Error::Unauthenticated { message: None })?;

        if session.is_revoked() {
            return Err(Error::Unauthenticated {
                message: Some("Session has been revoked".to_string()),
            });
        }
        if !session.is_active(now) {
            return Err(Error::Unauthenticated {
                message: Some("Session has expired".to_string()),
            });
        }

        if let Err(e) = self.store.touch_session(session.id, now).await {
            tracing::debug!(session_id = %abbrev_uuid(&session.id), "Failed to update session activity: {:#}", e);
        }
        Ok(session)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        Ok(self.store.list_active_sessions(user_id, self.clock.now()).await?)
    }

    /// Revoke one session. Users may revoke their own sessions; admins may revoke any.
    #[instrument(skip(self, actor, reason), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn revoke(&self, session_id: SessionId, actor: &Actor, reason: &str) -> Result<()> {
        self.revoke_as(session_id, actor, reason, AuditAction::SessionRevoked).await
    }

    /// Sign the caller out of the given session.
    #[instrument(skip(self, actor), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn end(&self, session_id: SessionId, actor: &Actor) -> Result<()> {
        self.revoke_as(session_id, actor, "logout", AuditAction::Logout).await
    }

    async fn revoke_as(&self, session_id: SessionId, actor: &Actor, reason: &str, action: AuditAction) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::not_found("Session", session_id))?;

        if session.user_id != actor.id && actor.role != Role::Admin {
            return Err(self
                .audit
                .deny(actor, SubjectType::Session, session_id.to_string(), "revoke another user's session")
                .await);
        }

        let now = self.clock.now();
        if !self.store.revoke_session(session_id, reason, now).await? {
            return Err(Error::invalid_state("Session is already revoked"));
        }

        self.audit
            .record_security(
                NewAuditEntry::builder()
                    .actor_id(actor.id)
                    .action(action)
                    .subject_type(SubjectType::Session)
                    .subject_id(session_id.to_string())
                    .description(format!("Session revoked: {reason}"))
                    .origin(actor.origin.clone())
                    .build(),
            )
            .await
    }

    /// Revoke every session of the user except `except` ("sign out other devices").
    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&self, user_id: UserId, except: Option<SessionId>, actor: &Actor) -> Result<Vec<SessionId>> {
        if user_id != actor.id && actor.role != Role::Admin {
            return Err(self
                .audit
                .deny(actor, SubjectType::Session, user_id.to_string(), "revoke another user's sessions")
                .await);
        }

        let revoked = self
            .store
            .revoke_sessions_for_user(user_id, except, "signed out from another device", self.clock.now())
            .await?;

        if !revoked.is_empty() {
            self.audit
                .record_security(
                    NewAuditEntry::builder()
                        .actor_id(actor.id)
                        .action(AuditAction::SessionRevoked)
                        .subject_type(SubjectType::Session)
                        .subject_id(user_id.to_string())
                        .description(format!("Revoked {} other session(s)", revoked.len()))
                        .after(serde_json::json!({ "revoked": revoked }))
                        .origin(actor.origin.clone())
                        .build(),
                )
                .await?;
        }
        Ok(revoked)
    }
}
