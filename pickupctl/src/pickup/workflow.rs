//! Pickup request state machine.
//!
//! ```text
//! create(guest) ──> PendingGuardianReview ──first approval──> PendingConfirmation
//! create(other) ─────────────────────────────────────────────> PendingConfirmation
//! PendingConfirmation ──confirm──> Confirmed ──complete──> Released
//! PendingConfirmation ──reject───> Rejected
//! PendingGuardianReview / PendingConfirmation ──guardian veto──> Rejected
//! any non-terminal ──cancel (requester)──> Cancelled
//! ```

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::instrument;

use super::approvals;
use super::tokens::{IssuedToken, TokenPayload, VerificationTokenService};
use super::{PickupContext, Step, Transition, transition};
use crate::audit::Actor;
use crate::db::models::audit::{AuditAction, NewAuditEntry, SubjectType};
use crate::db::models::requests::{GuestDetails, PickupRequest, RequestFilter, RequestKind, RequestState};
use crate::directory::Role;
use crate::errors::{Error, Result};
use crate::notify::Notification;
use crate::types::{PickupRequestId, StudentId, UserId, abbrev_uuid};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Input for [`PickupWorkflow::create`]. The requester is always the acting user.
#[derive(Debug, Clone)]
pub struct NewPickupRequest {
    pub kind: RequestKind,
    pub student_id: StudentId,
    pub pickup_person_id: Option<UserId>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub guest: Option<GuestDetails>,
}

/// How the guardians decided on a guest pickup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestOutcome {
    Approved,
    Rejected { note: Option<String> },
}

/// Apply the aggregated guardian decision to the parent request.
///
/// Approval only moves a request that is still waiting for it; later approvals leave the parent
/// alone. A veto rejects the request unless it has already been confirmed or closed.
pub(crate) async fn on_guest_approval_resolved(
    ctx: &PickupContext,
    request_id: PickupRequestId,
    outcome: &GuestOutcome,
) -> Result<Transition> {
    transition(ctx, request_id, |request| match outcome {
        GuestOutcome::Approved => match request.state {
            RequestState::PendingGuardianReview => {
                request.state = RequestState::PendingConfirmation;
                Ok(Step::Write)
            }
            RequestState::PendingConfirmation | RequestState::Confirmed | RequestState::Released => Ok(Step::Unchanged),
            RequestState::Rejected | RequestState::Cancelled => Err(Error::AlreadyResolved {
                message: format!("Pickup request is already {}", request.state),
            }),
        },
        GuestOutcome::Rejected { note } => match request.state {
            RequestState::PendingGuardianReview | RequestState::PendingConfirmation => {
                request.state = RequestState::Rejected;
                request.rejection_reason = Some(match note.as_deref().map(str::trim) {
                    Some(note) if !note.is_empty() => format!("guardian rejected: {note}"),
                    _ => "guardian rejected".to_string(),
                });
                Ok(Step::Write)
            }
            _ => Err(Error::AlreadyResolved {
                message: format!("Pickup request is already {} and can no longer be vetoed", request.state),
            }),
        },
    })
    .await
}

#[derive(Clone)]
pub struct PickupWorkflow {
    ctx: PickupContext,
    tokens: VerificationTokenService,
}

impl PickupWorkflow {
    pub fn new(ctx: PickupContext, tokens: VerificationTokenService) -> Self {
        Self { ctx, tokens }
    }

    fn validate_new(&self, new: &NewPickupRequest, now: DateTime<Utc>) -> Result<()> {
        match (&new.kind, &new.guest) {
            (RequestKind::Guest, None) => return Err(Error::validation("Guest pickups require the guest's name and phone")),
            (RequestKind::Guest, Some(guest)) => {
                if guest.name.trim().is_empty() || guest.phone.trim().is_empty() {
                    return Err(Error::validation("Guest pickups require the guest's name and phone"));
                }
            }
            (_, Some(_)) => return Err(Error::validation("Guest details are only allowed on guest pickups")),
            (_, None) => {}
        }

        if new.kind == RequestKind::Advance && new.scheduled_at.is_none() {
            return Err(Error::validation("Advance pickups require a scheduled time"));
        }
        if new.scheduled_at.is_some_and(|at| at <= now) {
            return Err(Error::validation("Scheduled time must be in the future"));
        }
        Ok(())
    }

    #[instrument(skip(self, actor, new), fields(student_id = %abbrev_uuid(&new.student_id), kind = ?new.kind), err)]
    pub async fn create(&self, actor: &Actor, new: NewPickupRequest) -> Result<PickupRequest> {
        let now = self.ctx.clock.now();
        self.validate_new(&new, now)?;

        self.ctx
            .directory
            .get_student(new.student_id)
            .await?
            .ok_or_else(|| Error::not_found("Student", new.student_id))?;

        let guardians = self.ctx.directory.authorized_guardians(new.student_id).await?;
        self.ctx
            .require(
                actor.role.is_staff() || guardians.contains(&actor.id),
                actor,
                SubjectType::PickupRequest,
                new.student_id,
                "request a pickup for this student",
            )
            .await?;

        if let Some(person) = new.pickup_person_id
            && !guardians.contains(&person)
        {
            return Err(Error::validation("Designated pickup person is not authorized for this student"));
        }

        let request = PickupRequest {
            id: uuid::Uuid::new_v4(),
            student_id: new.student_id,
            requester_id: actor.id,
            pickup_person_id: new.pickup_person_id,
            kind: new.kind,
            state: if new.kind == RequestKind::Guest {
                RequestState::PendingGuardianReview
            } else {
                RequestState::PendingConfirmation
            },
            requested_at: now,
            scheduled_at: new.scheduled_at,
            released_at: None,
            rejection_reason: None,
            guest: new.guest,
            release: None,
            confirmed_by: None,
            confirmed_at: None,
            token: None,
            emergency: None,
            requires_review: false,
            reviewed_by: None,
            reviewed_at: None,
            version: 0,
            updated_at: now,
        };

        let approvals = if request.kind == RequestKind::Guest {
            let approvals = approvals::build_fan_out(&request, &guardians, now);
            if approvals.is_empty() {
                return Err(Error::validation("Student has no guardian who can approve a guest pickup"));
            }
            approvals
        } else {
            Vec::new()
        };

        self.ctx.store.insert_request(&request, &approvals).await?;
        counter!("pickupctl_requests_created_total", "kind" => request.kind.as_str()).increment(1);

        self.ctx
            .audit
            .record(
                NewAuditEntry::builder()
                    .actor_id(actor.id)
                    .action(AuditAction::Create)
                    .subject_type(SubjectType::PickupRequest)
                    .subject_id(request.id.to_string())
                    .after(request.audit_snapshot())
                    .description(format!(
                        "Created {} pickup request ({} guardian approval(s) requested)",
                        request.kind.as_str(),
                        approvals.len()
                    ))
                    .origin(actor.origin.clone())
                    .build(),
            )
            .await;

        if let Some(guest) = &request.guest {
            self.ctx.notifications.notify(
                Notification::ApprovalRequested {
                    request_id: request.id,
                    student_id: request.student_id,
                    guest_name: guest.name.clone(),
                },
                approvals.iter().map(|a| a.guardian_id).collect(),
            );
        }

        tracing::info!(request_id = %abbrev_uuid(&request.id), state = %request.state, "Pickup request created");
        Ok(request)
    }

    /// Confirm a pending request and mint its verification token in the same write.
    #[instrument(skip(self, actor), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn confirm(&self, id: PickupRequestId, actor: &Actor) -> Result<(PickupRequest, IssuedToken)> {
        self.ctx
            .require(actor.role.is_staff(), actor, SubjectType::PickupRequest, id, "confirm pickup requests")
            .await?;

        let now = self.ctx.clock.now();
        let t = transition(&self.ctx, id, |request| {
            if request.state != RequestState::PendingConfirmation {
                return Err(Error::invalid_state(format!(
                    "Only pending requests can be confirmed (request is {})",
                    request.state
                )));
            }
            request.state = RequestState::Confirmed;
            request.confirmed_by = Some(actor.id);
            request.confirmed_at = Some(now);
            request.token = Some(self.tokens.new_record(request, now)?);
            Ok(Step::Write)
        })
        .await?;

        self.ctx
            .audit
            .record(t.audit_entry(Some(actor), AuditAction::Approve, "Pickup request confirmed"))
            .await;

        let record = t
            .after
            .token
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("confirmed request {id} has no token"))?;
        let issued = IssuedToken::from(TokenPayload::from_record(id, record));

        self.ctx.notifications.notify(
            Notification::Confirmed {
                request_id: id,
                token_expires_at: record.expires_at,
            },
            vec![t.after.requester_id],
        );
        Ok((t.after, issued))
    }

    #[instrument(skip(self, actor, reason), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn reject(&self, id: PickupRequestId, actor: &Actor, reason: &str) -> Result<PickupRequest> {
        self.ctx
            .require(actor.role.is_staff(), actor, SubjectType::PickupRequest, id, "reject pickup requests")
            .await?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("A reason is required to reject a pickup request"));
        }

        let t = transition(&self.ctx, id, |request| {
            if request.state != RequestState::PendingConfirmation {
                return Err(Error::invalid_state(format!(
                    "Only pending requests can be rejected (request is {})",
                    request.state
                )));
            }
            request.state = RequestState::Rejected;
            request.rejection_reason = Some(reason.to_string());
            Ok(Step::Write)
        })
        .await?;

        self.ctx
            .audit
            .record(t.audit_entry(Some(actor), AuditAction::Reject, format!("Rejected: {reason}")))
            .await;
        self.ctx.notifications.notify(
            Notification::Rejected {
                request_id: id,
                reason: reason.to_string(),
            },
            vec![t.after.requester_id],
        );
        Ok(t.after)
    }

    /// Withdraw a request. Only the requester may cancel, and only before release.
    #[instrument(skip(self, actor), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn cancel(&self, id: PickupRequestId, actor: &Actor) -> Result<PickupRequest> {
        let current = self.ctx.load_request(id).await?;
        self.ctx
            .require(
                current.requester_id == actor.id,
                actor,
                SubjectType::PickupRequest,
                id,
                "cancel another user's pickup request",
            )
            .await?;

        let now = self.ctx.clock.now();
        let t = transition(&self.ctx, id, |request| {
            if request.is_released() {
                return Err(Error::AlreadyReleased);
            }
            if request.state.is_terminal() {
                return Err(Error::invalid_state(format!("Pickup request is already {}", request.state)));
            }
            request.state = RequestState::Cancelled;
            if let Some(token) = request.token.as_mut()
                && token.is_live(now)
            {
                token.expires_at = now;
            }
            Ok(Step::Write)
        })
        .await?;

        self.ctx
            .audit
            .record(t.audit_entry(Some(actor), AuditAction::Cancel, "Cancelled by requester"))
            .await;
        Ok(t.after)
    }

    /// Clear the review flag on an emergency release.
    #[instrument(skip(self, actor), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_reviewed(&self, id: PickupRequestId, actor: &Actor) -> Result<PickupRequest> {
        self.ctx
            .require(
                actor.role == Role::Admin,
                actor,
                SubjectType::PickupRequest,
                id,
                "review emergency releases",
            )
            .await?;

        let now = self.ctx.clock.now();
        let t = transition(&self.ctx, id, |request| {
            if !request.requires_review {
                return Err(Error::invalid_state("Pickup request does not require review"));
            }
            request.requires_review = false;
            request.reviewed_by = Some(actor.id);
            request.reviewed_at = Some(now);
            Ok(Step::Write)
        })
        .await?;

        self.ctx
            .audit
            .record(t.audit_entry(Some(actor), AuditAction::Review, "Emergency release reviewed"))
            .await;
        Ok(t.after)
    }

    pub async fn get(&self, id: PickupRequestId, actor: &Actor) -> Result<PickupRequest> {
        let request = self.ctx.load_request(id).await?;
        let allowed = self.ctx.can_view(actor, &request).await?;
        self.ctx
            .require(allowed, actor, SubjectType::PickupRequest, id, "view this pickup request")
            .await?;
        Ok(request)
    }

    /// Guardians only ever see their own requests.
    pub async fn list(&self, mut filter: RequestFilter, actor: &Actor) -> Result<Vec<PickupRequest>> {
        if actor.role == Role::Guardian {
            filter.requester_id = Some(actor.id);
        }
        filter.skip = filter.skip.max(0);
        filter.limit = match filter.limit {
            l if l <= 0 => DEFAULT_PAGE_SIZE,
            l => l.min(MAX_PAGE_SIZE),
        };
        Ok(self.ctx.store.list_requests(&filter).await?)
    }

    pub async fn on_guest_approval_resolved(&self, id: PickupRequestId, outcome: &GuestOutcome) -> Result<Transition> {
        on_guest_approval_resolved(&self.ctx, id, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::TokenConfig;
    use crate::db::models::audit::AuditFilter;
    use crate::pickup::testing::{SECRET_KEY, World, world};

    fn workflow(w: &World) -> PickupWorkflow {
        PickupWorkflow::new(
            w.ctx.clone(),
            VerificationTokenService::new(w.ctx.clone(), SECRET_KEY, &TokenConfig::default()),
        )
    }

    fn standard(w: &World) -> NewPickupRequest {
        NewPickupRequest {
            kind: RequestKind::Standard,
            student_id: w.student,
            pickup_person_id: None,
            scheduled_at: None,
            guest: None,
        }
    }

    #[tokio::test]
    async fn test_create_standard() {
        let w = world();
        let request = workflow(&w).create(&w.parent, standard(&w)).await.unwrap();
        assert_eq!(request.state, RequestState::PendingConfirmation);
        assert_eq!(request.requester_id, w.parent.id);
        assert_eq!(request.version, 0);

        let audit = w
            .ctx
            .audit
            .query(&AuditFilter {
                subject_id: Some(request.id.to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Create);
        assert!(audit[0].before.is_none());
        assert_eq!(audit[0].after.as_ref().unwrap()["state"], "pending");
    }

    #[tokio::test]
    async fn test_create_validation() {
        let w = world();
        let wf = workflow(&w);

        let missing_guest = NewPickupRequest {
            kind: RequestKind::Guest,
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, missing_guest).await,
            Err(Error::ValidationFailed { .. })
        ));

        let stray_guest = NewPickupRequest {
            guest: Some(GuestDetails {
                name: "Gail".to_string(),
                phone: "555-0100".to_string(),
                external_id: None,
            }),
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, stray_guest).await,
            Err(Error::ValidationFailed { .. })
        ));

        let unscheduled_advance = NewPickupRequest {
            kind: RequestKind::Advance,
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, unscheduled_advance).await,
            Err(Error::ValidationFailed { .. })
        ));

        let unknown_student = NewPickupRequest {
            student_id: uuid::Uuid::new_v4(),
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, unknown_student).await,
            Err(Error::NotFound { .. })
        ));

        let designated_stranger = NewPickupRequest {
            pickup_person_id: Some(w.stranger.id),
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, designated_stranger).await,
            Err(Error::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_requires_guardian_or_staff() {
        let w = world();
        let wf = workflow(&w);

        assert!(matches!(
            wf.create(&w.stranger, standard(&w)).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            wf.create(&w.guard, standard(&w)).await,
            Err(Error::Forbidden { .. })
        ));
        wf.create(&w.teacher, standard(&w)).await.unwrap();

        let denied = w
            .ctx
            .audit
            .query(&AuditFilter {
                is_error: Some(true),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(denied.len(), 2);
        assert!(denied.iter().all(|e| e.action == AuditAction::AccessDenied));
    }

    /// Confirm is legal only from PendingConfirmation and leaves state alone otherwise.
    #[tokio::test]
    async fn test_confirm_legality() {
        let w = world();
        let wf = workflow(&w);
        let request = wf.create(&w.parent, standard(&w)).await.unwrap();

        assert!(matches!(
            wf.confirm(request.id, &w.parent).await,
            Err(Error::Forbidden { .. })
        ));

        let (confirmed, issued) = wf.confirm(request.id, &w.teacher).await.unwrap();
        assert_eq!(confirmed.state, RequestState::Confirmed);
        assert_eq!(confirmed.confirmed_by, Some(w.teacher.id));
        assert_eq!(confirmed.token.as_ref().unwrap().signature, issued.payload.token);
        assert_eq!(confirmed.version, 1);

        let err = wf.confirm(request.id, &w.admin).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        let unchanged = w.ctx.store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(unchanged, confirmed);

        let rejected = wf.create(&w.parent, standard(&w)).await.unwrap();
        wf.reject(rejected.id, &w.teacher, "no pickups during exams").await.unwrap();
        assert!(matches!(
            wf.confirm(rejected.id, &w.teacher).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let w = world();
        let wf = workflow(&w);
        let request = wf.create(&w.parent, standard(&w)).await.unwrap();

        assert!(matches!(
            wf.reject(request.id, &w.teacher, "   ").await,
            Err(Error::ValidationFailed { .. })
        ));
        let rejected = wf.reject(request.id, &w.teacher, "wrong day").await.unwrap();
        assert_eq!(rejected.state, RequestState::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("wrong day"));

        let sent = w.notifier.wait_for(1).await;
        assert_eq!(sent[0].1, vec![w.parent.id]);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let w = world();
        let wf = workflow(&w);
        let request = wf.create(&w.parent, standard(&w)).await.unwrap();

        assert!(matches!(
            wf.cancel(request.id, &w.second_guardian).await,
            Err(Error::Forbidden { .. })
        ));

        wf.confirm(request.id, &w.teacher).await.unwrap();
        let cancelled = wf.cancel(request.id, &w.parent).await.unwrap();
        assert_eq!(cancelled.state, RequestState::Cancelled);
        assert!(!cancelled.token.unwrap().is_live(w.clock.now()));

        assert!(matches!(
            wf.cancel(request.id, &w.parent).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_scopes_guardians_to_their_requests() {
        let w = world();
        let wf = workflow(&w);
        wf.create(&w.parent, standard(&w)).await.unwrap();
        wf.create(&w.second_guardian, standard(&w)).await.unwrap();
        wf.create(&w.teacher, standard(&w)).await.unwrap();

        let mine = wf.list(RequestFilter::default(), &w.parent).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].requester_id, w.parent.id);

        let all = wf
            .list(
                RequestFilter {
                    student_id: Some(w.student),
                    ..Default::default()
                },
                &w.teacher,
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let request = &mine[0];
        wf.get(request.id, &w.second_guardian).await.unwrap();
        assert!(matches!(
            wf.get(request.id, &w.stranger).await,
            Err(Error::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_scheduled_time_must_be_future() {
        let w = world();
        let wf = workflow(&w);
        let past = NewPickupRequest {
            kind: RequestKind::Advance,
            scheduled_at: Some(w.clock.now() - chrono::Duration::minutes(1)),
            ..standard(&w)
        };
        assert!(matches!(
            wf.create(&w.parent, past).await,
            Err(Error::ValidationFailed { .. })
        ));
    }
}
