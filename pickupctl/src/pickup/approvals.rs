//! Guest pickup approvals.
//!
//! A guest request fans out one approval per guardian allowed to collect the student. The first
//! approval moves the request on to staff confirmation; a rejection from any guardian vetoes it
//! while it is still pending. Each approval can be decided once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use super::workflow::{GuestOutcome, on_guest_approval_resolved};
use super::{PickupContext, Transition};
use crate::audit::Actor;
use crate::db::models::approvals::{ApprovalDecision, GuestApproval};
use crate::db::models::audit::{AuditAction, NewAuditEntry, SubjectType};
use crate::db::models::requests::PickupRequest;
use crate::errors::{Error, Result};
use crate::notify::Notification;
use crate::types::{ApprovalId, PickupRequestId, UserId, abbrev_uuid};

/// One pending approval per distinct guardian, in directory order.
pub(crate) fn build_fan_out(request: &PickupRequest, guardians: &[UserId], now: DateTime<Utc>) -> Vec<GuestApproval> {
    let mut seen = Vec::with_capacity(guardians.len());
    guardians
        .iter()
        .filter(|g| {
            if seen.contains(*g) {
                false
            } else {
                seen.push(**g);
                true
            }
        })
        .map(|g| GuestApproval::pending(request.id, *g, now))
        .collect()
}

/// An approval decision together with where it left the request
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedApproval {
    pub approval: GuestApproval,
    pub request: PickupRequest,
}

#[derive(Clone)]
pub struct GuestApprovalCoordinator {
    ctx: PickupContext,
}

impl GuestApprovalCoordinator {
    pub fn new(ctx: PickupContext) -> Self {
        Self { ctx }
    }

    /// Record a guardian's decision and push it through to the request.
    #[instrument(skip(self, actor, note), fields(approval_id = %abbrev_uuid(&approval_id), ?decision), err)]
    pub async fn resolve(
        &self,
        approval_id: ApprovalId,
        actor: &Actor,
        decision: ApprovalDecision,
        note: Option<String>,
    ) -> Result<ResolvedApproval> {
        let approval = self
            .ctx
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| Error::not_found("Guest approval", approval_id))?;

        self.ctx
            .require(
                approval.guardian_id == actor.id,
                actor,
                SubjectType::GuestApproval,
                approval_id,
                "decide another guardian's approval",
            )
            .await?;

        if !approval.is_pending() {
            return Err(Error::AlreadyResolved {
                message: format!("Approval was already {:?}", approval.decision).to_lowercase(),
            });
        }
        let outcome = match decision {
            ApprovalDecision::Pending => return Err(Error::validation("Decision must be approved or rejected")),
            ApprovalDecision::Approved => GuestOutcome::Approved,
            ApprovalDecision::Rejected => GuestOutcome::Rejected { note: note.clone() },
        };

        let request = self.ctx.load_request(approval.request_id).await?;
        if request.state.is_terminal() {
            return Err(Error::AlreadyResolved {
                message: format!("Pickup request is already {}", request.state),
            });
        }

        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let now = self.ctx.clock.now();
        let Some(resolved) = self
            .ctx
            .store
            .resolve_approval(approval_id, decision, note.as_deref(), now)
            .await?
        else {
            return Err(Error::AlreadyResolved {
                message: "Approval was decided concurrently".to_string(),
            });
        };

        let (action, verb) = match decision {
            ApprovalDecision::Rejected => (AuditAction::Reject, "rejected"),
            _ => (AuditAction::Approve, "approved"),
        };
        self.ctx
            .audit
            .record(
                NewAuditEntry::builder()
                    .actor_id(actor.id)
                    .action(action)
                    .subject_type(SubjectType::GuestApproval)
                    .subject_id(approval_id.to_string())
                    .before(serde_json::json!({ "decision": approval.decision }))
                    .after(serde_json::json!({
                        "decision": resolved.decision,
                        "request_id": resolved.request_id,
                        "note": resolved.note,
                    }))
                    .description(format!("Guardian {verb} guest pickup"))
                    .origin(actor.origin.clone())
                    .build(),
            )
            .await;

        let t = on_guest_approval_resolved(&self.ctx, approval.request_id, &outcome).await?;
        self.audit_request_transition(&t, actor, &outcome).await;

        self.ctx.notifications.notify(
            Notification::ApprovalResolved {
                request_id: t.after.id,
                approval_id,
                guardian_id: actor.id,
                decision,
            },
            vec![t.after.requester_id],
        );

        Ok(ResolvedApproval {
            approval: resolved,
            request: t.after,
        })
    }

    async fn audit_request_transition(&self, t: &Transition, actor: &Actor, outcome: &GuestOutcome) {
        if !t.changed() {
            return;
        }
        let entry = match outcome {
            GuestOutcome::Approved => t.audit_entry(
                Some(actor),
                AuditAction::Approve,
                "Guardian approval received, awaiting staff confirmation",
            ),
            GuestOutcome::Rejected { .. } => t.audit_entry(Some(actor), AuditAction::Reject, "Vetoed by guardian"),
        };
        self.ctx.audit.record(entry).await;
    }

    /// Approvals on a request, for anyone who may see the request.
    pub async fn list_for_request(&self, request_id: PickupRequestId, actor: &Actor) -> Result<Vec<GuestApproval>> {
        let request = self.ctx.load_request(request_id).await?;
        let allowed = self.ctx.can_view(actor, &request).await?;
        self.ctx
            .require(allowed, actor, SubjectType::PickupRequest, request_id, "view approvals for this request")
            .await?;
        Ok(self.ctx.store.list_approvals_for_request(request_id).await?)
    }

    /// Approvals still waiting on this guardian, leaving out those whose request was already
    /// vetoed, rejected, cancelled or confirmed.
    pub async fn pending_for_guardian(&self, actor: &Actor) -> Result<Vec<GuestApproval>> {
        Ok(self.ctx.store.list_pending_approvals_for_guardian(actor.id).await?)
    }
}
