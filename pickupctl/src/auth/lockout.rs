//! Failed-login lockout.
//!
//! Each login identity carries a count of consecutive failures. Reaching the threshold locks the
//! identity for a fixed duration; a successful login resets it. Expiry is evaluated lazily when
//! the state is read, so there is no background sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::instrument;

use crate::audit::AuditTrail;
use crate::clock::Clock;
use crate::config::LockoutConfig;
use crate::db::models::audit::{AuditAction, NewAuditEntry, Origin, SubjectType};
use crate::db::store::Store;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No recorded failures
    Clear,
    /// Some failures recorded; `remaining` more will lock the identity
    Warning { remaining: i32 },
    Locked { until: DateTime<Utc> },
}

impl LockStatus {
    /// Seconds until the lock lifts, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            LockStatus::Locked { until } => {
                let millis = (*until - now).num_milliseconds().max(0);
                Some((millis + 999) / 1000)
            }
            _ => None,
        }
    }
}

/// Normalized form used as the counter key, so `Pat@School` and `pat@school` share a count.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

#[derive(Clone)]
pub struct LockoutGuard {
    store: Arc<dyn Store>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    max_failed_attempts: i32,
    lock_duration: chrono::Duration,
}

impl LockoutGuard {
    pub fn new(store: Arc<dyn Store>, audit: AuditTrail, clock: Arc<dyn Clock>, config: &LockoutConfig) -> Self {
        Self {
            store,
            audit,
            clock,
            max_failed_attempts: i32::try_from(config.max_failed_attempts).unwrap_or(i32::MAX),
            lock_duration: chrono::Duration::from_std(config.lock_duration).unwrap_or(chrono::Duration::minutes(15)),
        }
    }

    pub async fn status(&self, identity: &str) -> Result<LockStatus> {
        let now = self.clock.now();
        let state = self.store.get_auth_attempts(&normalize_identity(identity)).await?;
        Ok(match state {
            None => LockStatus::Clear,
            Some(state) if state.is_locked(now) => LockStatus::Locked {
                until: state.locked_until.unwrap_or(now),
            },
            // An expired lock means the count starts over
            Some(state) if state.lock_expired(now) || state.failed_attempts == 0 => LockStatus::Clear,
            Some(state) => LockStatus::Warning {
                remaining: (self.max_failed_attempts - state.failed_attempts).max(0),
            },
        })
    }

    pub async fn is_locked(&self, identity: &str) -> Result<bool> {
        Ok(matches!(self.status(identity).await?, LockStatus::Locked { .. }))
    }

    /// Count a failed login. Returns the status after counting.
    #[instrument(skip(self, identity, origin), err)]
    pub async fn record_failure(&self, identity: &str, origin: &Origin) -> Result<LockStatus> {
        let key = normalize_identity(identity);
        let now = self.clock.now();
        let state = self
            .store
            .record_auth_failure(&key, self.max_failed_attempts, self.lock_duration, now)
            .await?;

        if let Some(until) = state.locked_until
            && state.is_locked(now)
        {
            if state.failed_attempts == self.max_failed_attempts {
                counter!("pickupctl_account_lockouts_total").increment(1);
                tracing::warn!(attempts = state.failed_attempts, %until, "Identity locked after repeated failed logins");
                self.audit
                    .record_security(
                        NewAuditEntry::builder()
                            .action(AuditAction::AccountLocked)
                            .subject_type(SubjectType::Identity)
                            .subject_id(key)
                            .description(format!("Locked after {} failed login attempts", state.failed_attempts))
                            .origin(origin.clone())
                            .after(serde_json::json!({
                                "failed_attempts": state.failed_attempts,
                                "locked_until": until,
                            }))
                            .status_code(429)
                            .is_error(true)
                            .build(),
                    )
                    .await?;
            }
            return Ok(LockStatus::Locked { until });
        }

        let remaining = (self.max_failed_attempts - state.failed_attempts).max(0);
        self.audit
            .record_security(
                NewAuditEntry::builder()
                    .action(AuditAction::LoginFailed)
                    .subject_type(SubjectType::Identity)
                    .subject_id(key)
                    .description(format!("Failed login, {remaining} attempt(s) remaining"))
                    .origin(origin.clone())
                    .status_code(401)
                    .is_error(true)
                    .build(),
            )
            .await?;
        Ok(LockStatus::Warning { remaining })
    }

    pub async fn record_success(&self, identity: &str) -> Result<()> {
        self.store.reset_auth_attempts(&normalize_identity(identity)).await?;
        Ok(())
    }
}
