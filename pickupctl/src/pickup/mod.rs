//! The pickup-authorization workflow.
//!
//! - [`workflow`]: the request state machine (create, confirm, reject, cancel, review)
//! - [`approvals`]: guest-pickup approval fan-out and aggregation
//! - [`tokens`]: signed, time-boxed verification tokens
//! - [`release`]: guard-facing verification and release
//!
//! Every transition is a read-check-write against the store, made atomic by writing conditionally
//! on the version that was read. A writer that loses the race re-reads and re-validates, so it
//! sees the winner's state (and usually fails with `InvalidState` or `AlreadyReleased`) instead
//! of silently overwriting it.

pub mod approvals;
pub mod release;
pub mod tokens;
pub mod workflow;

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use utoipa::ToSchema;

use crate::audit::{Actor, AuditTrail};
use crate::clock::Clock;
use crate::db::models::audit::{AuditAction, NewAuditEntry, SubjectType};
use crate::db::models::requests::PickupRequest;
use crate::db::store::Store;
use crate::directory::{Directory, Student};
use crate::errors::{Error, Result};
use crate::notify::NotificationDispatcher;
use crate::types::{PickupRequestId, UserId, abbrev_uuid};

/// Conflicting writes tolerated before a transition gives up.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Collaborators shared by every workflow service.
#[derive(Clone)]
pub struct PickupContext {
    pub store: Arc<dyn Store>,
    pub directory: Arc<dyn Directory>,
    pub audit: AuditTrail,
    pub notifications: NotificationDispatcher,
    pub clock: Arc<dyn Clock>,
}

impl PickupContext {
    pub async fn load_request(&self, id: PickupRequestId) -> Result<PickupRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| Error::not_found("Pickup request", id))
    }

    /// Fail with an audited `Forbidden` unless `allowed`.
    pub async fn require(&self, allowed: bool, actor: &Actor, subject_type: SubjectType, subject_id: impl ToString, action: &str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(self.audit.deny(actor, subject_type, subject_id.to_string(), action).await)
        }
    }

    /// Whether the actor may see the request at all.
    pub async fn can_view(&self, actor: &Actor, request: &PickupRequest) -> Result<bool> {
        if actor.role.is_staff() || actor.role.can_release() || actor.id == request.requester_id {
            return Ok(true);
        }
        Ok(self.directory.is_authorized_guardian(request.student_id, actor.id).await?)
    }
}

/// Outcome of applying a change to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Persist the modified request
    Write,
    /// Nothing to do; leave the stored request as it is
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub before: PickupRequest,
    pub after: PickupRequest,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.before.version != self.after.version
    }

    /// Audit entry for this transition with before/after snapshots.
    pub fn audit_entry(&self, actor: Option<&Actor>, action: AuditAction, description: impl Into<String>) -> NewAuditEntry {
        NewAuditEntry::builder()
            .maybe_actor_id(actor.map(|a| a.id))
            .action(action)
            .subject_type(SubjectType::PickupRequest)
            .subject_id(self.after.id.to_string())
            .before(self.before.audit_snapshot())
            .after(self.after.audit_snapshot())
            .description(description)
            .origin(actor.map(|a| a.origin.clone()).unwrap_or_default())
            .build()
    }
}

/// Read the request, apply `change`, and write it back if nobody else wrote in between.
///
/// `change` runs against a fresh copy on every attempt, so its checks always see the latest
/// stored state.
pub async fn transition<F>(ctx: &PickupContext, id: PickupRequestId, mut change: F) -> Result<Transition>
where
    F: FnMut(&mut PickupRequest) -> Result<Step>,
{
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let before = ctx.load_request(id).await?;
        let mut after = before.clone();
        if change(&mut after)? == Step::Unchanged {
            return Ok(Transition {
                after: before.clone(),
                before,
            });
        }

        after.version = before.version + 1;
        after.updated_at = ctx.clock.now();
        if ctx.store.update_request(&after, before.version).await? {
            return Ok(Transition { before, after });
        }

        counter!("pickupctl_write_conflicts_total").increment(1);
        tracing::debug!(request_id = %abbrev_uuid(&id), attempt, "Concurrent update to pickup request, re-reading");
    }

    Err(Error::invalid_state(
        "Pickup request is being modified concurrently, please retry",
    ))
}

/// Who is allowed to collect the child on a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthorizedPerson {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub name: String,
    pub phone: Option<String>,
    pub relationship: Option<String>,
}

/// What a guard needs to see before handing a child over
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPickup {
    pub request: PickupRequest,
    pub student: Option<Student>,
    pub authorized_person: AuthorizedPerson,
}

pub async fn describe(ctx: &PickupContext, request: PickupRequest) -> Result<VerifiedPickup> {
    let student = ctx.directory.get_student(request.student_id).await?;

    let authorized_person = if let Some(contact) = &request.emergency {
        AuthorizedPerson {
            user_id: None,
            name: contact.name.clone(),
            phone: Some(contact.phone.clone()),
            relationship: Some(contact.relationship.clone()),
        }
    } else if let Some(guest) = &request.guest {
        AuthorizedPerson {
            user_id: None,
            name: guest.name.clone(),
            phone: Some(guest.phone.clone()),
            relationship: Some("guest".to_string()),
        }
    } else {
        let person_id = request.pickup_person_id.unwrap_or(request.requester_id);
        let name = ctx
            .directory
            .get_user(person_id)
            .await?
            .map(|u| u.display_name)
            .unwrap_or_else(|| person_id.to_string());
        let relationship = ctx
            .directory
            .guardianships_for_student(request.student_id)
            .await?
            .into_iter()
            .find(|g| g.guardian_id == person_id)
            .map(|g| g.relationship);
        AuthorizedPerson {
            user_id: Some(person_id),
            name,
            phone: None,
            relationship,
        }
    };

    Ok(VerifiedPickup {
        request,
        student,
        authorized_person,
    })
}
