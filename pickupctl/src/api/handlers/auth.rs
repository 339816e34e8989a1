use axum::{Json, extract::State};

use crate::AppState;
use crate::api::models::auth::{AuthSuccessResponse, LoginRequest, LoginResponse};
use crate::auth::current_user::{ClientOrigin, CurrentUser};
use crate::auth::identity::Credentials;
use crate::auth::session::SessionMetadata;
use crate::errors::Result;

/// Login with email and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials; the message says how many attempts remain"),
        (status = 429, description = "Account temporarily locked; see Retry-After"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let credentials = Credentials {
        email: request.email,
        password: request.password,
    };
    let metadata = SessionMetadata {
        device_label: request.device_label.filter(|l| !l.trim().is_empty()),
        origin,
    };

    let outcome = state.authenticator.login(&credentials, metadata).await?;
    Ok(Json(LoginResponse {
        token: outcome.issued.token,
        session_id: outcome.issued.session.id,
        expires_at: outcome.issued.session.expires_at,
        user: outcome.claims.into(),
    }))
}

/// Logout (revoke the current session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
        (status = 401, description = "Missing or invalid session"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<AuthSuccessResponse>> {
    state
        .authenticator
        .logout(current_user.session_id, &current_user.actor())
        .await?;
    Ok(Json(AuthSuccessResponse {
        message: "Logout successful".to_string(),
    }))
}
