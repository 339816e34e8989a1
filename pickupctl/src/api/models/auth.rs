//! API request/response models for login and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::identity::Claims;
use crate::db::models::sessions::Session;
use crate::directory::Role;
use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Free-form label shown when listing sessions, e.g. "front gate tablet"
    pub device_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

impl From<Claims> for UserResponse {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.user_id,
            email: claims.email,
            display_name: claims.display_name,
            role: claims.role,
        }
    }
}

/// Successful login. `token` goes in `Authorization: Bearer <token>` on later requests.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    #[schema(value_type = String, format = "uuid")]
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// A login session. The bearer token itself is never returned after login.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SessionId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub device_label: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    /// Whether this is the session making the request
    pub current: bool,
}

impl SessionResponse {
    pub fn new(session: Session, current: SessionId) -> Self {
        Self {
            current: session.id == current,
            id: session.id,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            last_activity_at: session.last_activity_at,
            device_label: session.device_label,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RevokedSessionsResponse {
    #[schema(value_type = Vec<String>)]
    pub revoked: Vec<SessionId>,
}
