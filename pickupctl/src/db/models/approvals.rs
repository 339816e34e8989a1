//! Guest approval records, one per (request, authorized guardian).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{ApprovalId, PickupRequestId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct GuestApproval {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApprovalId,
    #[schema(value_type = String, format = "uuid")]
    pub request_id: PickupRequestId,
    #[schema(value_type = String, format = "uuid")]
    pub guardian_id: UserId,
    pub decision: ApprovalDecision,
    pub note: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GuestApproval {
    pub fn pending(request_id: PickupRequestId, guardian_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            request_id,
            guardian_id,
            decision: ApprovalDecision::Pending,
            note: None,
            responded_at: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision == ApprovalDecision::Pending
    }
}
