//! Guard-facing verification and release.
//!
//! A child is released exactly once. Completion is a conditional write on the request version,
//! so of two guards racing to release the same request one wins and the other sees
//! `AlreadyReleased`.

use metrics::counter;
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::tokens::{TokenPayload, VerificationTokenService};
use super::{PickupContext, Step, VerifiedPickup, describe, transition};
use crate::audit::Actor;
use crate::db::models::audit::{AuditAction, NewAuditEntry, SubjectType};
use crate::db::models::requests::{
    EmergencyContact, PickupRequest, ReleaseMethod, ReleaseRecord, RequestKind, RequestState,
};
use crate::directory::Role;
use crate::errors::{Error, Result};
use crate::notify::Notification;
use crate::types::{PickupRequestId, StudentId, abbrev_uuid};

/// Details recorded when handing a child over
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CompleteRelease {
    /// Guard compared the collecting adult against their photo ID
    #[serde(default)]
    pub photo_verified: bool,
    pub notes: Option<String>,
    /// The scanned verification token, if the release is token-based
    pub token: Option<String>,
}

/// A release outside the normal request chain, for when nobody on file can collect the child
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EmergencyRelease {
    #[schema(value_type = String, format = "uuid")]
    pub student_id: StudentId,
    pub person_name: String,
    pub person_phone: String,
    pub relationship: String,
    pub reason: String,
    pub notes: Option<String>,
}

impl EmergencyRelease {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("person_name", &self.person_name),
            ("person_phone", &self.person_phone),
            ("relationship", &self.relationship),
            ("reason", &self.reason),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{field} is required for an emergency release")));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReleaseVerifier {
    ctx: PickupContext,
    tokens: VerificationTokenService,
}

impl ReleaseVerifier {
    pub fn new(ctx: PickupContext, tokens: VerificationTokenService) -> Self {
        Self { ctx, tokens }
    }

    async fn require_guard(&self, actor: &Actor, subject_id: impl ToString, action: &str) -> Result<()> {
        self.ctx
            .require(actor.role.can_release(), actor, SubjectType::PickupRequest, subject_id, action)
            .await
    }

    /// Check a scanned token without changing anything.
    #[instrument(skip_all, err)]
    pub async fn verify_by_token(&self, presented: &str, actor: &Actor) -> Result<VerifiedPickup> {
        self.require_guard(actor, "token", "verify pickup tokens").await?;
        self.tokens.verify(presented).await
    }

    /// Find the confirmed request a guard should release the student against.
    #[instrument(skip(self, actor), fields(student_id = %abbrev_uuid(&student_id)), err)]
    pub async fn verify_by_student_lookup(&self, student_id: StudentId, actor: &Actor) -> Result<VerifiedPickup> {
        self.require_guard(actor, student_id, "look up pickups by student").await?;
        let request = self
            .ctx
            .store
            .latest_confirmed_for_student(student_id)
            .await?
            .ok_or_else(|| Error::not_found("Confirmed pickup for student", student_id))?;
        describe(&self.ctx, request).await
    }

    /// Hand the child over. Succeeds at most once per request.
    #[instrument(skip(self, actor, details), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn complete(&self, id: PickupRequestId, actor: &Actor, details: CompleteRelease) -> Result<PickupRequest> {
        self.require_guard(actor, id, "release students").await?;

        let payload = details.token.as_deref().map(TokenPayload::decode).transpose()?;
        if payload.as_ref().is_some_and(|p| p.request_id != id) {
            return Err(Error::SignatureMismatch);
        }
        let notes = details.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        let now = self.ctx.clock.now();
        let t = transition(&self.ctx, id, |request| {
            if request.is_released() {
                return Err(Error::AlreadyReleased);
            }
            if request.state != RequestState::Confirmed {
                return Err(Error::invalid_state(format!(
                    "Only confirmed requests can be released (request is {})",
                    request.state
                )));
            }
            if let Some(payload) = &payload {
                if now > payload.exp {
                    return Err(Error::Expired);
                }
                self.tokens.check_against(request, payload, now)?;
            }

            let method = if payload.is_some() {
                ReleaseMethod::Token
            } else if request.is_emergency() {
                ReleaseMethod::Emergency
            } else {
                ReleaseMethod::Manual
            };
            request.state = RequestState::Released;
            request.released_at = Some(now);
            request.release = Some(ReleaseRecord {
                method,
                released_by: actor.id,
                notes: notes.clone(),
                photo_verified: details.photo_verified,
            });
            if let Some(token) = request.token.as_mut()
                && token.is_live(now)
            {
                token.expires_at = now;
            }
            Ok(Step::Write)
        })
        .await?;

        let method = t.after.release.as_ref().map_or(ReleaseMethod::Manual, |r| r.method);
        counter!("pickupctl_releases_total", "method" => method.as_str()).increment(1);
        self.ctx
            .audit
            .record(t.audit_entry(
                Some(actor),
                AuditAction::Complete,
                format!("Student released ({})", method.as_str()),
            ))
            .await;

        self.ctx.notifications.notify(
            Notification::Released {
                request_id: id,
                method,
                released_at: now,
            },
            vec![t.after.requester_id],
        );

        tracing::info!(request_id = %abbrev_uuid(&id), ?method, "Student released");
        Ok(t.after)
    }

    /// Record an emergency release request. The request is born confirmed and flagged for
    /// administrator review; the guard then completes it like any other.
    #[instrument(skip(self, actor, emergency), fields(student_id = %abbrev_uuid(&emergency.student_id)), err)]
    pub async fn create_emergency_release(&self, actor: &Actor, emergency: EmergencyRelease) -> Result<PickupRequest> {
        self.require_guard(actor, emergency.student_id, "perform emergency releases")
            .await?;
        emergency.validate()?;

        self.ctx
            .directory
            .get_student(emergency.student_id)
            .await?
            .ok_or_else(|| Error::not_found("Student", emergency.student_id))?;

        let now = self.ctx.clock.now();
        let request = PickupRequest {
            id: uuid::Uuid::new_v4(),
            student_id: emergency.student_id,
            requester_id: actor.id,
            pickup_person_id: None,
            kind: RequestKind::Standard,
            state: RequestState::Confirmed,
            requested_at: now,
            scheduled_at: None,
            released_at: None,
            rejection_reason: None,
            guest: None,
            release: None,
            confirmed_by: Some(actor.id),
            confirmed_at: Some(now),
            token: None,
            emergency: Some(EmergencyContact {
                name: emergency.person_name.trim().to_string(),
                phone: emergency.person_phone.trim().to_string(),
                relationship: emergency.relationship.trim().to_string(),
                reason: emergency.reason.trim().to_string(),
                notes: emergency.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            }),
            requires_review: true,
            reviewed_by: None,
            reviewed_at: None,
            version: 0,
            updated_at: now,
        };
        self.ctx.store.insert_request(&request, &[]).await?;

        let mut after = request.audit_snapshot();
        after["emergency_contact"] = serde_json::json!(request.emergency);
        self.ctx
            .audit
            .record(
                NewAuditEntry::builder()
                    .actor_id(actor.id)
                    .action(AuditAction::Create)
                    .subject_type(SubjectType::PickupRequest)
                    .subject_id(request.id.to_string())
                    .after(after)
                    .description(format!("Emergency release created: {}", emergency.reason.trim()))
                    .origin(actor.origin.clone())
                    .build(),
            )
            .await;

        let admins = self
            .ctx
            .directory
            .users_with_role(Role::Admin)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        self.ctx.notifications.notify(
            Notification::EmergencyRelease {
                request_id: request.id,
                student_id: request.student_id,
                released_by: actor.id,
                reason: emergency.reason.trim().to_string(),
            },
            admins,
        );

        tracing::warn!(
            request_id = %abbrev_uuid(&request.id),
            guard = %abbrev_uuid(&actor.id),
            "Emergency release recorded, flagged for review"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::TokenConfig;
    use crate::db::models::audit::AuditFilter;
    use crate::pickup::testing::{SECRET_KEY, World, world};
    use crate::pickup::tokens::IssuedToken;
    use crate::pickup::workflow::{NewPickupRequest, PickupWorkflow};

    struct Services {
        workflow: PickupWorkflow,
        release: ReleaseVerifier,
    }

    fn services(w: &World) -> Services {
        let tokens = VerificationTokenService::new(w.ctx.clone(), SECRET_KEY, &TokenConfig::default());
        Services {
            workflow: PickupWorkflow::new(w.ctx.clone(), tokens.clone()),
            release: ReleaseVerifier::new(w.ctx.clone(), tokens),
        }
    }

    async fn confirmed(w: &World, s: &Services) -> (PickupRequest, IssuedToken) {
        let request = s
            .workflow
            .create(
                &w.parent,
                NewPickupRequest {
                    kind: RequestKind::Standard,
                    student_id: w.student,
                    pickup_person_id: Some(w.second_guardian.id),
                    scheduled_at: None,
                    guest: None,
                },
            )
            .await
            .unwrap();
        w.clock.advance(chrono::Duration::seconds(1));
        s.workflow.confirm(request.id, &w.teacher).await.unwrap()
    }

    /// Parent requests, teacher confirms, guard scans and releases.
    #[test_log::test(tokio::test)]
    async fn test_standard_pickup_end_to_end() {
        let w = world();
        let s = services(&w);
        let (request, issued) = confirmed(&w, &s).await;

        let verified = s.release.verify_by_token(&issued.encoded, &w.guard).await.unwrap();
        assert_eq!(verified.request.id, request.id);
        assert_eq!(verified.authorized_person.user_id, Some(w.second_guardian.id));
        assert_eq!(verified.authorized_person.relationship.as_deref(), Some("grandparent"));
        assert_eq!(verified.student.unwrap().name, "Sam Student");

        w.clock.advance(chrono::Duration::minutes(5));
        let released = s
            .release
            .complete(
                request.id,
                &w.guard,
                CompleteRelease {
                    photo_verified: true,
                    notes: Some("  ".to_string()),
                    token: Some(issued.encoded.clone()),
                },
            )
            .await
            .unwrap();
        assert_eq!(released.state, RequestState::Released);
        assert_eq!(released.released_at, Some(w.clock.now()));
        let record = released.release.as_ref().unwrap();
        assert_eq!(record.method, ReleaseMethod::Token);
        assert_eq!(record.released_by, w.guard.id);
        assert!(record.photo_verified);
        assert!(record.notes.is_none());

        // The token is spent
        assert!(matches!(
            s.release.verify_by_token(&issued.encoded, &w.guard).await,
            Err(Error::AlreadyReleased)
        ));

        let trail = w
            .ctx
            .audit
            .query(&AuditFilter {
                subject_id: Some(request.id.to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Complete, AuditAction::Approve, AuditAction::Create]
        );
        assert_eq!(trail[0].before.as_ref().unwrap()["state"], "confirmed");
        assert_eq!(trail[0].after.as_ref().unwrap()["state"], "released");
    }

    #[tokio::test]
    async fn test_concurrent_complete_releases_once() {
        let w = world();
        let s = services(&w);
        let (request, _) = confirmed(&w, &s).await;

        let attempts = (0..8).map(|_| {
            s.release
                .complete(request.id, &w.guard, CompleteRelease::default())
        });
        let results = futures::future::join_all(attempts).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(
                matches!(result, Err(Error::AlreadyReleased) | Err(Error::InvalidState { .. })),
                "unexpected: {result:?}"
            );
        }

        let stored = w.ctx.load_request(request.id).await.unwrap();
        assert_eq!(stored.state, RequestState::Released);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.release.unwrap().method, ReleaseMethod::Manual);
    }

    #[tokio::test]
    async fn test_complete_rejects_bad_tokens() {
        let w = world();
        let s = services(&w);
        let (request, issued) = confirmed(&w, &s).await;
        let (other, other_token) = confirmed(&w, &s).await;

        // Token for a different request
        assert!(matches!(
            s.release
                .complete(
                    request.id,
                    &w.guard,
                    CompleteRelease {
                        token: Some(other_token.encoded.clone()),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::SignatureMismatch)
        ));

        // Cancelled request
        s.workflow.cancel(other.id, &w.parent).await.unwrap();
        assert!(matches!(
            s.release
                .complete(
                    other.id,
                    &w.guard,
                    CompleteRelease {
                        token: Some(other_token.encoded),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::InvalidState { .. })
        ));

        w.clock.advance(chrono::Duration::hours(25));
        assert!(matches!(
            s.release
                .complete(
                    request.id,
                    &w.guard,
                    CompleteRelease {
                        token: Some(issued.encoded),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::Expired)
        ));
        assert_eq!(w.ctx.load_request(request.id).await.unwrap().state, RequestState::Confirmed);
    }

    #[tokio::test]
    async fn test_only_guards_and_admins_release() {
        let w = world();
        let s = services(&w);
        let (request, issued) = confirmed(&w, &s).await;

        for actor in [&w.parent, &w.teacher] {
            assert!(matches!(
                s.release.complete(request.id, actor, CompleteRelease::default()).await,
                Err(Error::Forbidden { .. })
            ));
            assert!(matches!(
                s.release.verify_by_token(&issued.encoded, actor).await,
                Err(Error::Forbidden { .. })
            ));
        }
        s.release
            .complete(request.id, &w.admin, CompleteRelease::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_request_cannot_be_released() {
        let w = world();
        let s = services(&w);
        let request = s
            .workflow
            .create(
                &w.parent,
                NewPickupRequest {
                    kind: RequestKind::Standard,
                    student_id: w.student,
                    pickup_person_id: None,
                    scheduled_at: None,
                    guest: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            s.release.complete(request.id, &w.guard, CompleteRelease::default()).await,
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            s.release.verify_by_student_lookup(w.student, &w.guard).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_student_lookup_finds_confirmed_request() {
        let w = world();
        let s = services(&w);
        let (request, _) = confirmed(&w, &s).await;

        let verified = s.release.verify_by_student_lookup(w.student, &w.guard).await.unwrap();
        assert_eq!(verified.request.id, request.id);

        let released = s
            .release
            .complete(request.id, &w.guard, CompleteRelease::default())
            .await
            .unwrap();
        assert_eq!(released.release.unwrap().method, ReleaseMethod::Manual);
        assert!(s.release.verify_by_student_lookup(w.student, &w.guard).await.is_err());
    }

    #[tokio::test]
    async fn test_emergency_release_flagged_for_review() {
        let w = world();
        let s = services(&w);

        let incomplete = EmergencyRelease {
            student_id: w.student,
            person_name: "Nina Neighbour".to_string(),
            person_phone: String::new(),
            relationship: "neighbour".to_string(),
            reason: "Both guardians in hospital".to_string(),
            notes: None,
        };
        assert!(matches!(
            s.release.create_emergency_release(&w.guard, incomplete.clone()).await,
            Err(Error::ValidationFailed { .. })
        ));
        assert!(matches!(
            s.release.create_emergency_release(&w.parent, incomplete.clone()).await,
            Err(Error::Forbidden { .. })
        ));

        let request = s
            .release
            .create_emergency_release(
                &w.guard,
                EmergencyRelease {
                    person_phone: "555-0199".to_string(),
                    notes: Some("ID checked against school records".to_string()),
                    ..incomplete
                },
            )
            .await
            .unwrap();
        assert_eq!(request.state, RequestState::Confirmed);
        assert!(request.requires_review);
        assert!(request.token.is_none());
        assert_eq!(request.confirmed_by, Some(w.guard.id));

        let sent = w.notifier.wait_for(1).await;
        assert_eq!(sent[0].0.event_type(), "pickup.emergency_release");
        assert_eq!(sent[0].1, vec![w.admin.id]);

        let verified = s.release.verify_by_student_lookup(w.student, &w.guard).await.unwrap();
        assert_eq!(verified.authorized_person.name, "Nina Neighbour");
        assert_eq!(verified.authorized_person.relationship.as_deref(), Some("neighbour"));
        let contact = verified.request.emergency.as_ref().unwrap();
        assert_eq!(contact.notes.as_deref(), Some("ID checked against school records"));

        let released = s
            .release
            .complete(request.id, &w.guard, CompleteRelease::default())
            .await
            .unwrap();
        assert_eq!(released.release.unwrap().method, ReleaseMethod::Emergency);

        assert!(matches!(
            s.workflow.mark_reviewed(request.id, &w.teacher).await,
            Err(Error::Forbidden { .. })
        ));
        let reviewed = s.workflow.mark_reviewed(request.id, &w.admin).await.unwrap();
        assert!(!reviewed.requires_review);
        assert_eq!(reviewed.reviewed_by, Some(w.admin.id));
        assert!(matches!(
            s.workflow.mark_reviewed(request.id, &w.admin).await,
            Err(Error::InvalidState { .. })
        ));
    }
}
