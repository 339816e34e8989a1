//! OpenAPI documentation for the pickup API.
//!
//! Served as an interactive reference at `/docs`. Everything except login lives under `/api/v1`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Bearer session security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("Session token")
                        .description(Some(
                            "Session token returned by `POST /authentication/login`:\n\n\
                            ```\nAuthorization: Bearer SESSION_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Pickup API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::sessions::list_sessions,
        api::handlers::sessions::revoke_session,
        api::handlers::sessions::revoke_other_sessions,
        api::handlers::requests::create_request,
        api::handlers::requests::list_requests,
        api::handlers::requests::get_request,
        api::handlers::requests::confirm_request,
        api::handlers::requests::reject_request,
        api::handlers::requests::cancel_request,
        api::handlers::requests::complete_request,
        api::handlers::requests::review_request,
        api::handlers::requests::get_token,
        api::handlers::requests::reissue_token,
        api::handlers::requests::list_request_approvals,
        api::handlers::approvals::list_pending_approvals,
        api::handlers::approvals::respond_to_approval,
        api::handlers::verify::verify_token,
        api::handlers::verify::verify_student,
        api::handlers::verify::create_emergency_release,
        api::handlers::audit::list_audit_logs,
    ),
    components(
        schemas(
            api::models::auth::LoginRequest,
            api::models::auth::LoginResponse,
            api::models::auth::UserResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::auth::SessionResponse,
            api::models::auth::RevokedSessionsResponse,
            api::models::requests::CreatePickupRequest,
            api::models::requests::PickupRequestResponse,
            api::models::requests::RejectPickupRequest,
            api::models::requests::ConfirmResponse,
            api::models::requests::TokenResponse,
            api::models::requests::VerifyTokenRequest,
            api::models::requests::VerifyStudentRequest,
            api::models::requests::VerifiedPickupResponse,
            api::models::approvals::RespondToApproval,
            api::models::approvals::ApprovalResolvedResponse,
            crate::db::models::requests::RequestKind,
            crate::db::models::requests::RequestState,
            crate::db::models::requests::ReleaseMethod,
            crate::db::models::requests::GuestDetails,
            crate::db::models::requests::ReleaseRecord,
            crate::db::models::requests::EmergencyContact,
            crate::db::models::approvals::GuestApproval,
            crate::db::models::approvals::ApprovalDecision,
            crate::db::models::audit::AuditLogEntry,
            crate::db::models::audit::AuditAction,
            crate::db::models::audit::SubjectType,
            crate::directory::Role,
            crate::directory::Student,
            crate::pickup::AuthorizedPerson,
            crate::pickup::release::CompleteRelease,
            crate::pickup::release::EmergencyRelease,
        )
    ),
    tags(
        (name = "authentication", description = "Login and logout"),
        (name = "sessions", description = "List and revoke your login sessions"),
        (name = "requests", description = "Create, confirm, reject and cancel pickup requests.

Guardians request pickups for their own students. Teachers and administrators confirm them, which issues a
signed verification token for the person collecting the student."),
        (name = "approvals", description = "Guest pickups need one of the student's authorized guardians to approve them
before staff can confirm. Any guardian may veto until the request is confirmed."),
        (name = "tokens", description = "Verification tokens rendered as QR codes"),
        (name = "release", description = "Guard-side verification, release and emergency release"),
        (name = "audit", description = "Append-only record of every state change and denied action"),
    ),
    info(
        title = "Pickup API",
        version = "1.0.0",
        description = "Authorizes, verifies and audits the release of students to the adults collecting them.

## Authentication

Log in with `POST /authentication/login` and pass the returned token on every other request:

```
Authorization: Bearer SESSION_TOKEN
```

Repeated failed logins lock the account for a while; locked logins answer `429` with a `Retry-After` header.

## Errors

Errors are JSON objects with a `message` field.",
    ),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_has_bearer_auth_and_routes() {
        let doc = ApiDoc::openapi();
        let components = doc.components.as_ref().unwrap();
        assert!(components.security_schemes.contains_key("BearerAuth"));
        assert!(doc.paths.paths.contains_key("/requests/{id}/complete"));
        assert!(doc.paths.paths.contains_key("/authentication/login"));
        assert!(doc.paths.paths.contains_key("/audit-logs"));
    }
}
