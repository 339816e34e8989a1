use axum::{
    Json,
    extract::{Path, State},
};

use crate::AppState;
use crate::api::models::approvals::{ApprovalResolvedResponse, RespondToApproval};
use crate::auth::current_user::CurrentUser;
use crate::db::models::approvals::GuestApproval;
use crate::errors::Result;
use crate::types::ApprovalId;

#[utoipa::path(
    get,
    path = "/approvals/pending",
    tag = "approvals",
    summary = "Guest approvals waiting on the caller",
    responses(
        (status = 200, description = "Pending approvals", body = Vec<GuestApproval>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_pending_approvals(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<GuestApproval>>> {
    Ok(Json(state.approvals.pending_for_guardian(&current_user.actor()).await?))
}

#[utoipa::path(
    post,
    path = "/approvals/{id}/respond",
    tag = "approvals",
    summary = "Approve or reject a guest pickup",
    description = "The first approval moves the request on to staff confirmation. A rejection vetoes the request
unless it has already been confirmed.",
    params(("id" = String, Path, description = "Approval ID")),
    request_body = RespondToApproval,
    responses(
        (status = 200, description = "Decision recorded", body = ApprovalResolvedResponse),
        (status = 400, description = "Invalid decision"),
        (status = 403, description = "Approval belongs to another guardian"),
        (status = 404, description = "Approval not found"),
        (status = 409, description = "Already decided, or the request can no longer change"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn respond_to_approval(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ApprovalId>,
    Json(body): Json<RespondToApproval>,
) -> Result<Json<ApprovalResolvedResponse>> {
    let resolved = state
        .approvals
        .resolve(id, &current_user.actor(), body.decision, body.note)
        .await?;
    Ok(Json(resolved.into()))
}
