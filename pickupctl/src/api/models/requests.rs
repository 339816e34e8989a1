//! API request/response models for pickup requests, tokens and guard verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::requests::{
    EmergencyContact, GuestDetails, PickupRequest, ReleaseRecord, RequestFilter, RequestKind, RequestState,
};
use crate::directory::Student;
use crate::pickup::workflow::NewPickupRequest;
use crate::pickup::{AuthorizedPerson, VerifiedPickup};
use crate::types::{PickupRequestId, StudentId, UserId};

/// Body for creating a pickup request. The requester is always the caller.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePickupRequest {
    pub kind: RequestKind,
    #[schema(value_type = String, format = "uuid")]
    pub student_id: StudentId,
    /// Another authorized guardian who will collect the student
    #[schema(value_type = Option<String>, format = "uuid")]
    pub pickup_person_id: Option<UserId>,
    /// Required for advance pickups
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Required for guest pickups, rejected otherwise
    pub guest: Option<GuestDetails>,
}

impl From<CreatePickupRequest> for NewPickupRequest {
    fn from(body: CreatePickupRequest) -> Self {
        Self {
            kind: body.kind,
            student_id: body.student_id,
            pickup_person_id: body.pickup_person_id,
            scheduled_at: body.scheduled_at,
            guest: body.guest,
        }
    }
}

/// Pickup request as returned by the API. The token signature is never included.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PickupRequestResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PickupRequestId,
    #[schema(value_type = String, format = "uuid")]
    pub student_id: StudentId,
    #[schema(value_type = String, format = "uuid")]
    pub requester_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub pickup_person_id: Option<UserId>,
    pub kind: RequestKind,
    pub state: RequestState,
    pub requested_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub guest: Option<GuestDetails>,
    pub release: Option<ReleaseRecord>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub confirmed_by: Option<UserId>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub emergency: Option<EmergencyContact>,
    pub requires_review: bool,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<PickupRequest> for PickupRequestResponse {
    fn from(r: PickupRequest) -> Self {
        Self {
            id: r.id,
            student_id: r.student_id,
            requester_id: r.requester_id,
            pickup_person_id: r.pickup_person_id,
            kind: r.kind,
            state: r.state,
            requested_at: r.requested_at,
            scheduled_at: r.scheduled_at,
            released_at: r.released_at,
            rejection_reason: r.rejection_reason,
            guest: r.guest,
            release: r.release,
            confirmed_by: r.confirmed_by,
            confirmed_at: r.confirmed_at,
            token_expires_at: r.token.map(|t| t.expires_at),
            emergency: r.emergency,
            requires_review: r.requires_review,
            reviewed_by: r.reviewed_by,
            reviewed_at: r.reviewed_at,
            version: r.version,
            updated_at: r.updated_at,
        }
    }
}

/// Query parameters for listing pickup requests
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListRequestsQuery {
    #[param(value_type = Option<String>, format = "uuid")]
    pub student_id: Option<StudentId>,
    /// Ignored for guardians, who only ever see their own requests
    #[param(value_type = Option<String>, format = "uuid")]
    pub requester_id: Option<UserId>,
    #[param(value_type = Option<String>)]
    pub state: Option<RequestState>,

    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

impl From<ListRequestsQuery> for RequestFilter {
    fn from(q: ListRequestsQuery) -> Self {
        let (skip, limit) = q.pagination.params();
        Self {
            student_id: q.student_id,
            requester_id: q.requester_id,
            state: q.state,
            skip,
            limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RejectPickupRequest {
    pub reason: String,
}

/// Confirmation result: the confirmed request and its verification token
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfirmResponse {
    pub request: PickupRequestResponse,
    pub token: TokenResponse,
}

/// A verification token ready to render as a QR code
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: PickupRequestId,
    /// base64url transport form
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<crate::pickup::tokens::IssuedToken> for TokenResponse {
    fn from(issued: crate::pickup::tokens::IssuedToken) -> Self {
        Self {
            request_id: issued.payload.request_id,
            token: issued.encoded,
            expires_at: issued.payload.exp,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyTokenRequest {
    /// base64url transport form or raw JSON payload
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyStudentRequest {
    #[schema(value_type = String, format = "uuid")]
    pub student_id: StudentId,
}

/// Everything a guard needs before handing a student over
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifiedPickupResponse {
    pub request: PickupRequestResponse,
    pub student: Option<Student>,
    pub authorized_person: AuthorizedPerson,
}

impl From<VerifiedPickup> for VerifiedPickupResponse {
    fn from(v: VerifiedPickup) -> Self {
        Self {
            request: v.request.into(),
            student: v.student,
            authorized_person: v.authorized_person,
        }
    }
}
