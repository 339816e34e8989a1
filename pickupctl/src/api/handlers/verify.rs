//! Guard-facing verification and emergency release endpoints.

use axum::{Json, extract::State, http::StatusCode};

use crate::AppState;
use crate::api::models::requests::{PickupRequestResponse, VerifiedPickupResponse, VerifyStudentRequest, VerifyTokenRequest};
use crate::auth::current_user::CurrentUser;
use crate::errors::Result;
use crate::pickup::release::EmergencyRelease;

#[utoipa::path(
    post,
    path = "/verify/token",
    tag = "release",
    summary = "Verify a scanned token",
    description = "Checks the token without changing anything. Accepts the base64url form or raw JSON.",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = VerifiedPickupResponse),
        (status = 400, description = "Malformed token"),
        (status = 401, description = "Token does not match the request"),
        (status = 403, description = "Guards and administrators only"),
        (status = 409, description = "Request not confirmed or already released"),
        (status = 410, description = "Token expired"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn verify_token(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<VerifyTokenRequest>,
) -> Result<Json<VerifiedPickupResponse>> {
    let verified = state.release.verify_by_token(&body.token, &current_user.actor()).await?;
    Ok(Json(verified.into()))
}

#[utoipa::path(
    post,
    path = "/verify/student",
    tag = "release",
    summary = "Look up the confirmed pickup for a student",
    request_body = VerifyStudentRequest,
    responses(
        (status = 200, description = "Most recently confirmed, unreleased request", body = VerifiedPickupResponse),
        (status = 403, description = "Guards and administrators only"),
        (status = 404, description = "No confirmed pickup for the student"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn verify_student(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<VerifyStudentRequest>,
) -> Result<Json<VerifiedPickupResponse>> {
    let verified = state
        .release
        .verify_by_student_lookup(body.student_id, &current_user.actor())
        .await?;
    Ok(Json(verified.into()))
}

#[utoipa::path(
    post,
    path = "/emergency-releases",
    tag = "release",
    summary = "Record an emergency release",
    description = "Creates a confirmed request for a person not on file, flagged for administrator review.
Complete it with `POST /requests/{id}/complete`.",
    request_body = EmergencyRelease,
    responses(
        (status = 201, description = "Emergency release recorded", body = PickupRequestResponse),
        (status = 400, description = "Missing person details or reason"),
        (status = 403, description = "Guards and administrators only"),
        (status = 404, description = "Student not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_emergency_release(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<EmergencyRelease>,
) -> Result<(StatusCode, Json<PickupRequestResponse>)> {
    let request = state
        .release
        .create_emergency_release(&current_user.actor(), body)
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    fn emergency_body(app: &TestApp) -> Value {
        json!({
            "student_id": app.student,
            "person_name": "Dana Neighbour",
            "person_phone": "+44 7700 900456",
            "relationship": "neighbour",
            "reason": "Parents stuck abroad, school closing early",
            "notes": "Mother confirmed by phone",
        })
    }

    #[tokio::test]
    async fn test_emergency_release_flow() {
        let app = TestApp::new();
        let guard = app.login(&app.guard).await;
        let admin = app.login(&app.admin).await;

        let created = app
            .server
            .post("/api/v1/emergency-releases")
            .authorization_bearer(&guard)
            .json(&emergency_body(&app))
            .await;
        created.assert_status(StatusCode::CREATED);
        let created: Value = created.json();
        assert_eq!(created["state"], "confirmed");
        assert_eq!(created["requires_review"], true);
        assert_eq!(created["emergency"]["name"], "Dana Neighbour");
        assert_eq!(created["emergency"]["notes"], "Mother confirmed by phone");

        let sent = app.notifier.wait_for(1).await;
        assert_eq!(sent[0].0.event_type(), "pickup.emergency_release");
        assert_eq!(sent[0].1, vec![app.admin.id]);
        let id = created["id"].as_str().unwrap();

        let lookup = app
            .server
            .post("/api/v1/verify/student")
            .authorization_bearer(&guard)
            .json(&json!({ "student_id": app.student }))
            .await;
        lookup.assert_status_ok();
        let lookup: Value = lookup.json();
        assert_eq!(lookup["authorized_person"]["name"], "Dana Neighbour");
        assert_eq!(lookup["request"]["emergency"]["notes"], "Mother confirmed by phone");

        let released = app
            .server
            .post(&format!("/api/v1/requests/{id}/complete"))
            .authorization_bearer(&guard)
            .json(&json!({ "photo_verified": true, "notes": "checked driving licence" }))
            .await;
        released.assert_status_ok();
        assert_eq!(released.json::<Value>()["release"]["method"], "emergency");

        let reviewed = app
            .server
            .post(&format!("/api/v1/requests/{id}/review"))
            .authorization_bearer(&admin)
            .await;
        reviewed.assert_status_ok();
        assert_eq!(reviewed.json::<Value>()["reviewed_by"], json!(app.admin.id));
    }

    #[tokio::test]
    async fn test_gate_endpoints_are_for_guards() {
        let app = TestApp::new();
        let parent = app.login(&app.parent).await;
        let teacher = app.login(&app.teacher).await;

        for token in [&parent, &teacher] {
            app.server
                .post("/api/v1/emergency-releases")
                .authorization_bearer(token)
                .json(&emergency_body(&app))
                .await
                .assert_status(StatusCode::FORBIDDEN);
            app.server
                .post("/api/v1/verify/student")
                .authorization_bearer(token)
                .json(&json!({ "student_id": app.student }))
                .await
                .assert_status(StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn test_emergency_release_needs_details() {
        let app = TestApp::new();
        let guard = app.login(&app.guard).await;
        let mut body = emergency_body(&app);
        body["reason"] = json!(" ");

        app.server
            .post("/api/v1/emergency-releases")
            .authorization_bearer(&guard)
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let app = TestApp::new();
        let guard = app.login(&app.guard).await;
        app.server
            .post("/api/v1/verify/token")
            .authorization_bearer(&guard)
            .json(&json!({ "token": "definitely not a token" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_student_without_confirmed_pickup() {
        let app = TestApp::new();
        let guard = app.login(&app.guard).await;
        app.server
            .post("/api/v1/verify/student")
            .authorization_bearer(&guard)
            .json(&json!({ "student_id": app.student }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
