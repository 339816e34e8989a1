//! Extractors for the authenticated caller and their network origin.
//!
//! The caller's identity always comes from the bearer session, never from the request body.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts},
};
use serde::Serialize;
use tracing::{instrument, trace};
use utoipa::ToSchema;

use crate::AppState;
use crate::audit::Actor;
use crate::db::models::audit::Origin;
use crate::directory::Role;
use crate::errors::{Error, Result};
use crate::types::{SessionId, UserId};

/// The user behind the bearer session on this request
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[schema(value_type = String, format = "uuid")]
    pub session_id: SessionId,
    #[serde(skip)]
    pub origin: Origin,
}

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role).with_origin(self.origin.clone())
    }
}

/// Caller IP and user agent. The first `X-Forwarded-For` hop wins over the peer address.
#[derive(Debug, Clone, Default)]
pub struct ClientOrigin(pub Origin);

pub fn request_origin(parts: &Parts) -> Origin {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty());

    let ip_address = forwarded.or_else(|| {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    });

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    Origin { ip_address, user_agent }
}

fn bearer_token(parts: &Parts) -> Result<&str> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or(Error::Unauthenticated { message: None })?
        .to_str()
        .map_err(|e| Error::validation(format!("Invalid authorization header: {e}")))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Error::Unauthenticated {
            message: Some("Expected a bearer token".to_string()),
        })
}

impl<S: Send + Sync> FromRequestParts<S> for ClientOrigin {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(ClientOrigin(request_origin(parts)))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts)?;
        let session = state.sessions.validate(token).await?;

        // The account may have been removed from the directory since the session was issued
        let user = state
            .directory
            .get_user(session.user_id)
            .await?
            .ok_or(Error::Unauthenticated {
                message: Some("Account no longer exists".to_string()),
            })?;

        trace!(user_id = %user.id, "Authenticated session");
        Ok(CurrentUser {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            session_id: session.id,
            origin: request_origin(parts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_forwarded_for_wins() {
        let mut p = parts(
            Request::builder()
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .header("user-agent", "gate-scanner/2.1"),
        );
        p.extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51000))));

        let origin = request_origin(&p);
        assert_eq!(origin.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(origin.user_agent.as_deref(), Some("gate-scanner/2.1"));
    }

    #[test]
    fn test_peer_address_fallback() {
        let mut p = parts(Request::builder());
        p.extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51000))));
        assert_eq!(request_origin(&p).ip_address.as_deref(), Some("192.168.1.20"));
        assert!(request_origin(&parts(Request::builder())).ip_address.is_none());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let p = parts(Request::builder().header("authorization", "Bearer abc123"));
        assert_eq!(bearer_token(&p).unwrap(), "abc123");

        let p = parts(Request::builder().header("authorization", "Basic Zm9vOmJhcg=="));
        assert!(matches!(bearer_token(&p), Err(Error::Unauthenticated { .. })));

        assert!(matches!(
            bearer_token(&parts(Request::builder())),
            Err(Error::Unauthenticated { .. })
        ));
    }
}
