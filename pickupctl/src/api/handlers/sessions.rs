use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::AppState;
use crate::api::models::auth::{RevokedSessionsResponse, SessionResponse};
use crate::auth::current_user::CurrentUser;
use crate::errors::Result;
use crate::types::SessionId;

#[utoipa::path(
    get,
    path = "/sessions",
    tag = "sessions",
    summary = "List the caller's active sessions",
    responses(
        (status = 200, description = "Active sessions, one per signed-in device", body = Vec<SessionResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_sessions(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<SessionResponse>>> {
    let sessions = state.sessions.list_for_user(current_user.id).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionResponse::new(s, current_user.session_id))
            .collect(),
    ))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    summary = "Revoke a session",
    description = "Users may revoke their own sessions; administrators may revoke any session.",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 403, description = "Not the caller's session"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already revoked"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn revoke_session(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<SessionId>,
) -> Result<StatusCode> {
    state.sessions.revoke(id, &current_user.actor(), "revoked by user").await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/sessions/revoke-others",
    tag = "sessions",
    summary = "Sign out every other device",
    responses(
        (status = 200, description = "Sessions revoked", body = RevokedSessionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<RevokedSessionsResponse>> {
    let revoked = state
        .sessions
        .revoke_all_for_user(current_user.id, Some(current_user.session_id), &current_user.actor())
        .await?;
    Ok(Json(RevokedSessionsResponse { revoked }))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn test_revoke_other_sessions_keeps_current() {
        let app = TestApp::new();
        let phone = app.login(&app.parent).await;
        let laptop = app.login(&app.parent).await;

        let revoked = app
            .server
            .post("/api/v1/sessions/revoke-others")
            .authorization_bearer(&laptop)
            .await;
        revoked.assert_status_ok();
        assert_eq!(revoked.json::<Value>()["revoked"].as_array().unwrap().len(), 1);

        app.server
            .get("/api/v1/sessions")
            .authorization_bearer(&phone)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        app.server
            .get("/api/v1/sessions")
            .authorization_bearer(&laptop)
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_cannot_revoke_someone_elses_session() {
        let app = TestApp::new();
        let parent = app.login(&app.parent).await;
        let stranger = app.login(&app.stranger).await;

        let sessions: Vec<Value> = app.server.get("/api/v1/sessions").authorization_bearer(&parent).await.json();
        let id = sessions[0]["id"].as_str().unwrap();

        app.server
            .delete(&format!("/api/v1/sessions/{id}"))
            .authorization_bearer(&stranger)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server
            .delete(&format!("/api/v1/sessions/{id}"))
            .authorization_bearer(&parent)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }
}
