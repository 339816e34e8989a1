//! Pickup request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{PickupRequestId, StudentId, UserId};

/// What kind of pickup is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Same-day pickup by the requester or a designated guardian
    Standard,
    /// Pickup scheduled ahead of time
    Advance,
    /// Pickup by a non-guardian; needs approval from the student's guardians
    Guest,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Standard => "standard",
            RequestKind::Advance => "advance",
            RequestKind::Guest => "guest",
        }
    }
}

/// Lifecycle state of a pickup request.
///
/// ```text
/// PendingGuardianReview --approve--> PendingConfirmation --confirm--> Confirmed --release--> Released
///          |                                  |                           |
///          +-------veto-------> Rejected <----+--reject                   |
///                                                                         |
///  (any non-terminal) --cancel--> Cancelled                               |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Guest request waiting for a guardian decision
    #[serde(rename = "pending_parent_approval")]
    #[sqlx(rename = "pending_parent_approval")]
    PendingGuardianReview,
    /// Waiting for a teacher or admin to confirm
    #[serde(rename = "pending")]
    #[sqlx(rename = "pending")]
    PendingConfirmation,
    Confirmed,
    Released,
    Rejected,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Released | RequestState::Rejected | RequestState::Cancelled)
    }

    /// States in which a guardian's pending approval can still be answered.
    pub fn awaits_guardians(&self) -> bool {
        matches!(self, RequestState::PendingGuardianReview | RequestState::PendingConfirmation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::PendingGuardianReview => "pending_parent_approval",
            RequestState::PendingConfirmation => "pending",
            RequestState::Confirmed => "confirmed",
            RequestState::Released => "released",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the child was handed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReleaseMethod {
    /// A verification token was scanned
    Token,
    /// Guard looked the request up by student
    Manual,
    /// Emergency release outside the normal chain
    Emergency,
}

impl ReleaseMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMethod::Token => "token",
            ReleaseMethod::Manual => "manual",
            ReleaseMethod::Emergency => "emergency",
        }
    }
}

/// Identity of a non-guardian collecting the child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GuestDetails {
    pub name: String,
    pub phone: String,
    /// Identity document or other external reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Metadata recorded at the moment of release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReleaseRecord {
    pub method: ReleaseMethod,
    #[schema(value_type = String, format = "uuid")]
    pub released_by: UserId,
    pub notes: Option<String>,
    pub photo_verified: bool,
}

/// Persisted half of a verification token. The transport form is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Hex HMAC-SHA256 signature
    pub signature: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Person and circumstances of an emergency release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub relationship: String,
    pub reason: String,
    /// What the guard noted at the gate, e.g. how identity was checked
    pub notes: Option<String>,
}

/// Pickup request aggregate.
///
/// `version` increases by one on every persisted change and is the key for conditional writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRequest {
    pub id: PickupRequestId,
    pub student_id: StudentId,
    pub requester_id: UserId,
    pub pickup_person_id: Option<UserId>,
    pub kind: RequestKind,
    pub state: RequestState,
    pub requested_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub guest: Option<GuestDetails>,
    pub release: Option<ReleaseRecord>,
    pub confirmed_by: Option<UserId>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub token: Option<TokenRecord>,
    pub emergency: Option<EmergencyContact>,
    pub requires_review: bool,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl PickupRequest {
    /// The single completion predicate: a child has left with someone.
    pub fn is_released(&self) -> bool {
        self.state == RequestState::Released
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.is_some()
    }

    /// Snapshot stored in audit before/after payloads. Never contains the token signature.
    pub fn audit_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state,
            "kind": self.kind,
            "student_id": self.student_id,
            "requester_id": self.requester_id,
            "pickup_person_id": self.pickup_person_id,
            "scheduled_at": self.scheduled_at,
            "released_at": self.released_at,
            "rejection_reason": self.rejection_reason,
            "confirmed_by": self.confirmed_by,
            "release": self.release,
            "emergency": self.is_emergency(),
            "requires_review": self.requires_review,
            "token_expires_at": self.token.as_ref().map(|t| t.expires_at),
            "version": self.version,
        })
    }
}

/// Filter for listing pickup requests
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub student_id: Option<StudentId>,
    pub requester_id: Option<UserId>,
    pub state: Option<RequestState>,
    pub skip: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_value(RequestState::PendingGuardianReview).unwrap(),
            "pending_parent_approval"
        );
        assert_eq!(serde_json::to_value(RequestState::PendingConfirmation).unwrap(), "pending");
        assert_eq!(
            serde_json::from_value::<RequestState>(serde_json::json!("released")).unwrap(),
            RequestState::Released
        );
        assert_eq!(RequestState::PendingGuardianReview.to_string(), "pending_parent_approval");
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Released.is_terminal());
        assert!(RequestState::Rejected.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
        assert!(!RequestState::Confirmed.is_terminal());
        assert!(!RequestState::PendingConfirmation.is_terminal());
    }
}
