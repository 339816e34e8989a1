//! Verification tokens presented at the point of release.
//!
//! A token is bound to one confirmed request. Minting draws a random secret, signs
//! `"{request_id}:{secret}"` with the server key, and persists the hex signature and expiry on the
//! request. The guard's device presents the transport form:
//!
//! ```text
//! base64url(json({"requestId": "...", "token": "<hex signature>", "exp": "<RFC 3339>"}))
//! ```
//!
//! Verification never recomputes the signature from the payload. It compares the presented
//! `token` with the persisted one and checks both expiries, so invalidating the persisted token
//! kills every copy of the transport form at once.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use super::{PickupContext, Step, VerifiedPickup, describe, transition};
use crate::audit::Actor;
use crate::config::TokenConfig;
use crate::crypto::{constant_time_eq, generate_secret_token, hmac_sha256_hex};
use crate::db::models::audit::{AuditAction, SubjectType};
use crate::db::models::requests::{PickupRequest, RequestState, TokenRecord};
use crate::errors::{Error, Result};
use crate::types::{PickupRequestId, abbrev_uuid};

/// Decoded transport form of a verification token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: PickupRequestId,
    /// Hex HMAC-SHA256 signature
    pub token: String,
    pub exp: DateTime<Utc>,
}

impl TokenPayload {
    pub(crate) fn from_record(request_id: PickupRequestId, record: &TokenRecord) -> Self {
        Self {
            request_id,
            token: record.signature.clone(),
            exp: record.expires_at,
        }
    }

    /// Text form suitable for a QR code.
    pub fn encode(&self) -> String {
        // Serializing a struct of strings and a timestamp cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Accepts the base64url transport form or the raw JSON.
    pub fn decode(presented: &str) -> Result<Self> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(Error::Malformed {
                message: "empty payload".to_string(),
            });
        }

        let json = if presented.starts_with('{') {
            presented.as_bytes().to_vec()
        } else {
            general_purpose::URL_SAFE_NO_PAD
                .decode(presented.trim_end_matches('='))
                .map_err(|e| Error::Malformed {
                    message: format!("not base64url: {e}"),
                })?
        };

        let payload: TokenPayload = serde_json::from_slice(&json).map_err(|e| Error::Malformed { message: e.to_string() })?;
        if payload.token.is_empty() {
            return Err(Error::Malformed {
                message: "missing token".to_string(),
            });
        }
        Ok(payload)
    }
}

/// A token ready to hand to the guardian
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedToken {
    pub payload: TokenPayload,
    /// base64url transport form of `payload`
    pub encoded: String,
}

impl From<TokenPayload> for IssuedToken {
    fn from(payload: TokenPayload) -> Self {
        Self {
            encoded: payload.encode(),
            payload,
        }
    }
}

#[derive(Clone)]
pub struct VerificationTokenService {
    ctx: PickupContext,
    key: Vec<u8>,
    default_ttl: chrono::Duration,
    schedule_grace: chrono::Duration,
}

fn to_chrono(d: Duration, fallback: chrono::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(fallback)
}

impl VerificationTokenService {
    pub fn new(ctx: PickupContext, secret_key: &str, config: &TokenConfig) -> Self {
        Self {
            ctx,
            key: secret_key.as_bytes().to_vec(),
            default_ttl: to_chrono(config.default_ttl, chrono::Duration::hours(24)),
            schedule_grace: to_chrono(config.schedule_grace, chrono::Duration::hours(1)),
        }
    }

    /// Expiry for a token minted at `now`: the earlier of the scheduled pickup plus grace and
    /// `now` plus the default lifetime. A schedule that has already passed does not bound it.
    pub fn expiry_for(&self, request: &PickupRequest, now: DateTime<Utc>) -> DateTime<Utc> {
        let ceiling = now + self.default_ttl;
        match request.scheduled_at {
            Some(scheduled) if scheduled + self.schedule_grace > now => (scheduled + self.schedule_grace).min(ceiling),
            _ => ceiling,
        }
    }

    /// Fresh token record for the request. Supersedes whatever was there.
    pub fn new_record(&self, request: &PickupRequest, now: DateTime<Utc>) -> Result<TokenRecord> {
        let secret = generate_secret_token();
        let signature = hmac_sha256_hex(&self.key, &format!("{}:{}", request.id, secret))
            .ok_or_else(|| anyhow::anyhow!("failed to initialise token signer"))?;
        Ok(TokenRecord {
            signature,
            issued_at: now,
            expires_at: self.expiry_for(request, now),
        })
    }

    /// Everything about the presented token except its own `exp`, checked against the stored
    /// request. Used both by `verify` and inside the release write.
    pub fn check_against(&self, request: &PickupRequest, payload: &TokenPayload, now: DateTime<Utc>) -> Result<()> {
        let Some(record) = &request.token else {
            return Err(Error::SignatureMismatch);
        };
        if payload.request_id != request.id || !constant_time_eq(payload.token.as_bytes(), record.signature.as_bytes()) {
            return Err(Error::SignatureMismatch);
        }
        if request.is_released() {
            return Err(Error::AlreadyReleased);
        }
        if request.state != RequestState::Confirmed {
            return Err(Error::NotConfirmed);
        }
        // Invalidated or superseded on the server
        if !record.is_live(now) {
            return Err(Error::SignatureMismatch);
        }
        Ok(())
    }

    fn may_view_token(&self, actor: &Actor, request: &PickupRequest) -> bool {
        actor.id == request.requester_id || actor.role.is_staff() || actor.role.can_release()
    }

    /// Token for a confirmed request. Returns the live token if there is one.
    #[instrument(skip(self, actor), fields(request_id = %abbrev_uuid(&request_id)), err)]
    pub async fn mint(&self, request_id: PickupRequestId, actor: &Actor) -> Result<IssuedToken> {
        let request = self.ctx.load_request(request_id).await?;
        self.ctx
            .require(
                self.may_view_token(actor, &request),
                actor,
                SubjectType::PickupRequest,
                request_id,
                "view the verification token",
            )
            .await?;
        self.issue(request_id, actor, false).await
    }

    /// Replace the token even if the current one is still live, for a lost or leaked code.
    #[instrument(skip(self, actor), fields(request_id = %abbrev_uuid(&request_id)), err)]
    pub async fn force_remint(&self, request_id: PickupRequestId, actor: &Actor) -> Result<IssuedToken> {
        let request = self.ctx.load_request(request_id).await?;
        self.ctx
            .require(
                actor.id == request.requester_id || actor.role.is_staff(),
                actor,
                SubjectType::PickupRequest,
                request_id,
                "reissue the verification token",
            )
            .await?;
        self.issue(request_id, actor, true).await
    }

    async fn issue(&self, request_id: PickupRequestId, actor: &Actor, replace: bool) -> Result<IssuedToken> {
        let now = self.ctx.clock.now();
        let t = transition(&self.ctx, request_id, |request| {
            if request.is_released() {
                return Err(Error::AlreadyReleased);
            }
            if request.state != RequestState::Confirmed {
                return Err(Error::NotConfirmed);
            }
            if !replace && request.token.as_ref().is_some_and(|t| t.is_live(now)) {
                return Ok(Step::Unchanged);
            }
            request.token = Some(self.new_record(request, now)?);
            Ok(Step::Write)
        })
        .await?;

        if t.changed() {
            let description = if replace {
                "Verification token reissued"
            } else {
                "Verification token issued"
            };
            self.ctx
                .audit
                .record(t.audit_entry(Some(actor), AuditAction::TokenIssued, description))
                .await;
        }

        let record = t
            .after
            .token
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("confirmed request {request_id} has no token after issue"))?;
        Ok(TokenPayload::from_record(request_id, record).into())
    }

    /// Check a presented token. Never changes state.
    #[instrument(skip_all, err)]
    pub async fn verify(&self, presented: &str) -> Result<VerifiedPickup> {
        let payload = TokenPayload::decode(presented)?;
        let now = self.ctx.clock.now();
        if now > payload.exp {
            return Err(Error::Expired);
        }

        let request = self.ctx.load_request(payload.request_id).await?;
        self.check_against(&request, &payload, now)?;
        describe(&self.ctx, request).await
    }

    /// Force the current token to expire now.
    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&request_id)), err)]
    pub async fn invalidate(&self, request_id: PickupRequestId) -> Result<()> {
        let now = self.ctx.clock.now();
        transition(&self.ctx, request_id, |request| match request.token.as_mut() {
            Some(token) if token.is_live(now) => {
                token.expires_at = now;
                Ok(Step::Write)
            }
            _ => Ok(Step::Unchanged),
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickup::testing::{SECRET_KEY, World, world};
    use crate::pickup::workflow::{NewPickupRequest, PickupWorkflow};
    use crate::clock::Clock;
    use crate::db::models::requests::RequestKind;

    fn services(w: &World) -> (PickupWorkflow, VerificationTokenService) {
        let tokens = VerificationTokenService::new(w.ctx.clone(), SECRET_KEY, &TokenConfig::default());
        (PickupWorkflow::new(w.ctx.clone(), tokens.clone()), tokens)
    }

    async fn confirmed(
        w: &World,
        workflow: &PickupWorkflow,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> (PickupRequest, IssuedToken) {
        let request = workflow
            .create(
                &w.parent,
                NewPickupRequest {
                    kind: if scheduled_at.is_some() {
                        RequestKind::Advance
                    } else {
                        RequestKind::Standard
                    },
                    student_id: w.student,
                    pickup_person_id: None,
                    scheduled_at,
                    guest: None,
                },
            )
            .await
            .unwrap();
        workflow.confirm(request.id, &w.teacher).await.unwrap()
    }

    #[test]
    fn test_decode_accepts_both_forms() {
        let payload = TokenPayload {
            request_id: uuid::Uuid::new_v4(),
            token: "ab12".to_string(),
            exp: Utc::now(),
        };
        assert_eq!(TokenPayload::decode(&payload.encode()).unwrap(), payload);
        assert_eq!(
            TokenPayload::decode(&serde_json::to_string(&payload).unwrap()).unwrap(),
            payload
        );

        for bad in ["", "!!!not-base64!!!", r#"{"requestId": "x"}"#, r#"{"token": "ab"}"#] {
            assert!(matches!(TokenPayload::decode(bad), Err(Error::Malformed { .. })), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_expiry_bounded_by_schedule() {
        let w = world();
        let (workflow, tokens) = services(&w);
        let now = w.clock.now();

        let (_, issued) = confirmed(&w, &workflow, Some(now + chrono::Duration::hours(2))).await;
        assert_eq!(issued.payload.exp, now + chrono::Duration::hours(3));

        let (request, issued) = confirmed(&w, &workflow, None).await;
        assert_eq!(issued.payload.exp, now + chrono::Duration::hours(24));

        // A schedule days away does not stretch the token past the default lifetime
        let far = PickupRequest {
            scheduled_at: Some(now + chrono::Duration::days(3)),
            ..request
        };
        assert_eq!(tokens.expiry_for(&far, now), now + chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn test_mint_is_idempotent_while_live() {
        let w = world();
        let (workflow, tokens) = services(&w);
        let (request, issued) = confirmed(&w, &workflow, None).await;

        let again = tokens.mint(request.id, &w.parent).await.unwrap();
        assert_eq!(again.payload, issued.payload);

        let replaced = tokens.force_remint(request.id, &w.parent).await.unwrap();
        assert_ne!(replaced.payload.token, issued.payload.token);

        // The superseded token no longer verifies
        assert!(matches!(
            tokens.verify(&issued.encoded).await,
            Err(Error::SignatureMismatch)
        ));
        tokens.verify(&replaced.encoded).await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_requires_confirmed() {
        let w = world();
        let (workflow, tokens) = services(&w);
        let request = workflow
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
            tokens.mint(request.id, &w.parent).await,
            Err(Error::NotConfirmed)
        ));
        assert!(matches!(
            tokens.mint(request.id, &w.stranger).await,
            Err(Error::Forbidden { .. })
        ));
    }

    /// Each of the four acceptance conditions flips the result on its own.
    #[tokio::test]
    async fn test_acceptance_conditions() {
        let w = world();
        let (workflow, tokens) = services(&w);
        let (request, issued) = confirmed(&w, &workflow, None).await;

        let verified = tokens.verify(&issued.encoded).await.unwrap();
        assert_eq!(verified.request.id, request.id);
        assert_eq!(verified.authorized_person.user_id, Some(w.parent.id));
        assert_eq!(verified.authorized_person.relationship.as_deref(), Some("parent"));
        assert_eq!(verified.student.unwrap().id, w.student);

        // Signature
        let forged = TokenPayload {
            token: "0".repeat(64),
            ..issued.payload.clone()
        };
        assert!(matches!(tokens.verify(&forged.encode()).await, Err(Error::SignatureMismatch)));

        // State
        let stored = w.ctx.store.get_request(request.id).await.unwrap().unwrap();
        let pending = PickupRequest {
            state: RequestState::PendingConfirmation,
            version: stored.version + 1,
            ..stored.clone()
        };
        assert!(w.ctx.store.update_request(&pending, stored.version).await.unwrap());
        assert!(matches!(tokens.verify(&issued.encoded).await, Err(Error::NotConfirmed)));
        let restored = PickupRequest {
            version: pending.version + 1,
            ..stored.clone()
        };
        assert!(w.ctx.store.update_request(&restored, pending.version).await.unwrap());
        tokens.verify(&issued.encoded).await.unwrap();

        // Release
        let released = PickupRequest {
            state: RequestState::Released,
            released_at: Some(w.clock.now()),
            version: restored.version + 1,
            ..restored.clone()
        };
        assert!(w.ctx.store.update_request(&released, restored.version).await.unwrap());
        assert!(matches!(tokens.verify(&issued.encoded).await, Err(Error::AlreadyReleased)));
        let unreleased = PickupRequest {
            version: released.version + 1,
            ..restored.clone()
        };
        assert!(w.ctx.store.update_request(&unreleased, released.version).await.unwrap());
        tokens.verify(&issued.encoded).await.unwrap();

        // Time
        w.clock.advance(chrono::Duration::hours(25));
        assert!(matches!(tokens.verify(&issued.encoded).await, Err(Error::Expired)));
    }

    #[tokio::test]
    async fn test_invalidate_kills_outstanding_copies() {
        let w = world();
        let (workflow, tokens) = services(&w);
        let (request, issued) = confirmed(&w, &workflow, None).await;

        tokens.invalidate(request.id).await.unwrap();
        w.clock.advance(chrono::Duration::seconds(1));
        assert!(matches!(tokens.verify(&issued.encoded).await, Err(Error::SignatureMismatch)));

        // A fresh mint is possible once the old one is dead
        let fresh = tokens.mint(request.id, &w.parent).await.unwrap();
        assert_ne!(fresh.payload.token, issued.payload.token);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let w = world();
        let (_, tokens) = services(&w);
        let payload = TokenPayload {
            request_id: uuid::Uuid::new_v4(),
            token: "ab".to_string(),
            exp: w.clock.now() + chrono::Duration::hours(1),
        };
        assert!(matches!(tokens.verify(&payload.encode()).await, Err(Error::NotFound { .. })));
    }
}
