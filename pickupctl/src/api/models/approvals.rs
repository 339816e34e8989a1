//! API request/response models for guest approvals.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::requests::PickupRequestResponse;
use crate::db::models::approvals::{ApprovalDecision, GuestApproval};
use crate::pickup::approvals::ResolvedApproval;

/// A guardian's decision on a guest pickup
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RespondToApproval {
    /// `approved` or `rejected`
    pub decision: ApprovalDecision,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApprovalResolvedResponse {
    pub approval: GuestApproval,
    /// The pickup request after the decision was applied
    pub request: PickupRequestResponse,
}

impl From<ResolvedApproval> for ApprovalResolvedResponse {
    fn from(r: ResolvedApproval) -> Self {
        Self {
            approval: r.approval,
            request: r.request.into(),
        }
    }
}
