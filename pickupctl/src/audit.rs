//! Append-only audit trail.
//!
//! Ordinary workflow transitions are recorded best-effort: a failed audit write is logged and
//! counted but does not undo the transition. Security events (access denials, lockouts, session
//! revocations) are recorded synchronously and their failure fails the operation.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;

use crate::clock::Clock;
use crate::db::models::audit::{AuditAction, AuditFilter, AuditLogEntry, NewAuditEntry, Origin, SubjectType};
use crate::db::store::Store;
use crate::directory::Role;
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_uuid};

/// Who is performing an operation, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub origin: Origin,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            origin: Origin::default(),
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a workflow transition. Never fails the caller.
    pub async fn record(&self, entry: NewAuditEntry) {
        let action = entry.action;
        let subject = entry.subject_id.clone();
        if let Err(e) = self.store.append_audit(&entry.into_entry(self.clock.now())).await {
            counter!("pickupctl_audit_write_failures_total").increment(1);
            tracing::error!(?action, %subject, "Failed to write audit entry: {:#}", e);
        }
    }

    /// Record a security event. The caller's operation fails if this does.
    pub async fn record_security(&self, entry: NewAuditEntry) -> Result<()> {
        self.store.append_audit(&entry.into_entry(self.clock.now())).await?;
        Ok(())
    }

    /// Audit an access denial and return the error to hand back to the caller.
    pub async fn deny(&self, actor: &Actor, subject_type: SubjectType, subject_id: impl Into<String>, action: &str) -> Error {
        let subject_id = subject_id.into();
        tracing::info!(
            actor = %abbrev_uuid(&actor.id),
            role = ?actor.role,
            %subject_id,
            "Access denied: {action}"
        );

        let entry = NewAuditEntry::builder()
            .actor_id(actor.id)
            .action(AuditAction::AccessDenied)
            .subject_type(subject_type)
            .subject_id(subject_id)
            .description(format!("{:?} attempted to {action}", actor.role).to_lowercase())
            .origin(actor.origin.clone())
            .status_code(403)
            .is_error(true)
            .error_message(format!("Not permitted to {action}"))
            .build();

        match self.record_security(entry).await {
            Ok(()) => Error::Forbidden { action: action.to_string() },
            Err(e) => e,
        }
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        Ok(self.store.query_audit(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::in_memory::InMemoryStore;
    use uuid::Uuid;

    fn trail() -> AuditTrail {
        AuditTrail::new(Arc::new(InMemoryStore::new()), Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn test_deny_records_access_denied() {
        let audit = trail();
        let actor = Actor::new(Uuid::new_v4(), Role::Guardian).with_origin(Origin {
            ip_address: Some("10.0.0.7".to_string()),
            user_agent: Some("gate-scanner/1.0".to_string()),
        });
        let request_id = Uuid::new_v4();

        let err = audit
            .deny(&actor, SubjectType::PickupRequest, request_id.to_string(), "confirm pickup requests")
            .await;
        assert!(matches!(err, Error::Forbidden { .. }));

        let entries = audit
            .query(&AuditFilter {
                subject_id: Some(request_id.to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.action, AuditAction::AccessDenied);
        assert_eq!(entry.actor_id, Some(actor.id));
        assert!(entry.is_error);
        assert_eq!(entry.status_code, Some(403));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(entry.user_agent.as_deref(), Some("gate-scanner/1.0"));
    }
}
