//! Pickup request lifecycle endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::AppState;
use crate::api::models::requests::{
    ConfirmResponse, CreatePickupRequest, ListRequestsQuery, PickupRequestResponse, RejectPickupRequest, TokenResponse,
};
use crate::auth::current_user::CurrentUser;
use crate::db::models::approvals::GuestApproval;
use crate::errors::Result;
use crate::pickup::release::CompleteRelease;
use crate::types::PickupRequestId;

#[utoipa::path(
    post,
    path = "/requests",
    tag = "requests",
    summary = "Create a pickup request",
    description = "Guardians may request pickups for their own students; teachers and administrators for any student.
Guest requests are sent to every authorized guardian for approval before staff can confirm them.",
    request_body = CreatePickupRequest,
    responses(
        (status = 201, description = "Request created", body = PickupRequestResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Caller may not request pickups for this student"),
        (status = 404, description = "Student not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<CreatePickupRequest>,
) -> Result<(StatusCode, Json<PickupRequestResponse>)> {
    let request = state.workflow.create(&current_user.actor(), body.into()).await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

#[utoipa::path(
    get,
    path = "/requests",
    tag = "requests",
    summary = "List pickup requests",
    description = "Newest first. Guardians only see requests they created.",
    params(ListRequestsQuery),
    responses(
        (status = 200, description = "Pickup requests", body = Vec<PickupRequestResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_requests(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<PickupRequestResponse>>> {
    let requests = state.workflow.list(query.into(), &current_user.actor()).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/requests/{id}",
    tag = "requests",
    summary = "Get a pickup request",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Pickup request", body = PickupRequestResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<PickupRequestResponse>> {
    let request = state.workflow.get(id, &current_user.actor()).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/confirm",
    tag = "requests",
    summary = "Confirm a pending request",
    description = "Teachers and administrators only. Issues the verification token in the same step.",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Request confirmed", body = ConfirmResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Request is not pending confirmation"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn confirm_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<ConfirmResponse>> {
    let (request, token) = state.workflow.confirm(id, &current_user.actor()).await?;
    Ok(Json(ConfirmResponse {
        request: request.into(),
        token: token.into(),
    }))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/reject",
    tag = "requests",
    summary = "Reject a pending request",
    params(("id" = String, Path, description = "Pickup request ID")),
    request_body = RejectPickupRequest,
    responses(
        (status = 200, description = "Request rejected", body = PickupRequestResponse),
        (status = 400, description = "Missing reason"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not pending confirmation"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn reject_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
    Json(body): Json<RejectPickupRequest>,
) -> Result<Json<PickupRequestResponse>> {
    let request = state.workflow.reject(id, &current_user.actor(), &body.reason).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/cancel",
    tag = "requests",
    summary = "Cancel a request",
    description = "Only the original requester may cancel, and only before the student is released.",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Request cancelled", body = PickupRequestResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request already released, rejected or cancelled"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<PickupRequestResponse>> {
    let request = state.workflow.cancel(id, &current_user.actor()).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/complete",
    tag = "release",
    summary = "Release the student",
    description = "Guards and administrators only. When a scanned token is supplied it is checked in the same
write that records the release.",
    params(("id" = String, Path, description = "Pickup request ID")),
    request_body = CompleteRelease,
    responses(
        (status = 200, description = "Student released", body = PickupRequestResponse),
        (status = 400, description = "Malformed token"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not confirmed, or was already released"),
        (status = 410, description = "Token expired"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn complete_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
    Json(body): Json<CompleteRelease>,
) -> Result<Json<PickupRequestResponse>> {
    let request = state.release.complete(id, &current_user.actor(), body).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/review",
    tag = "release",
    summary = "Mark an emergency release as reviewed",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Review recorded", body = PickupRequestResponse),
        (status = 403, description = "Administrators only"),
        (status = 409, description = "Request does not require review"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn review_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<PickupRequestResponse>> {
    let request = state.workflow.mark_reviewed(id, &current_user.actor()).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    get,
    path = "/requests/{id}/token",
    tag = "tokens",
    summary = "Get the verification token",
    description = "Returns the live token for a confirmed request, issuing a new one if the previous token expired.",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Verification token", body = TokenResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not confirmed, or was already released"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_token(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<TokenResponse>> {
    let issued = state.tokens.mint(id, &current_user.actor()).await?;
    Ok(Json(issued.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/token",
    tag = "tokens",
    summary = "Reissue the verification token",
    description = "Supersedes the current token, for example when a QR code was lost or shared.",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "New verification token", body = TokenResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not confirmed, or was already released"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn reissue_token(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<TokenResponse>> {
    let issued = state.tokens.force_remint(id, &current_user.actor()).await?;
    Ok(Json(issued.into()))
}

#[utoipa::path(
    get,
    path = "/requests/{id}/approvals",
    tag = "approvals",
    summary = "List guardian approvals for a guest request",
    params(("id" = String, Path, description = "Pickup request ID")),
    responses(
        (status = 200, description = "Approvals", body = Vec<GuestApproval>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_request_approvals(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PickupRequestId>,
) -> Result<Json<Vec<GuestApproval>>> {
    Ok(Json(state.approvals.list_for_request(id, &current_user.actor()).await?))
}
