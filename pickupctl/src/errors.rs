use crate::db::errors::DbError;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided, or credentials rejected
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Identity is temporarily locked after repeated failed logins
    #[error("Account locked for another {retry_after_secs}s")]
    Locked { retry_after_secs: i64 },

    /// Caller's role or relationship does not permit the operation
    #[error("Not permitted to {action}")]
    Forbidden { action: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Transition is not legal from the aggregate's current state
    #[error("{message}")]
    InvalidState { message: String },

    /// The approval, or the request it belongs to, has already been decided
    #[error("{message}")]
    AlreadyResolved { message: String },

    /// The child has already been released on this request
    #[error("Pickup request has already been released")]
    AlreadyReleased,

    /// A token was requested or presented for a request that is not confirmed
    #[error("Pickup request is not confirmed")]
    NotConfirmed,

    /// Verification token has expired or has been invalidated
    #[error("Verification token has expired")]
    Expired,

    /// Verification token does not match the persisted signature
    #[error("Verification token signature mismatch")]
    SignatureMismatch,

    /// Verification payload could not be decoded
    #[error("Malformed verification payload: {message}")]
    Malformed { message: String },

    /// Invalid request data
    #[error("{message}")]
    ValidationFailed { message: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::ValidationFailed { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } | Error::SignatureMismatch => StatusCode::UNAUTHORIZED,
            Error::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidState { .. } | Error::AlreadyResolved { .. } | Error::AlreadyReleased | Error::NotConfirmed => {
                StatusCode::CONFLICT
            }
            Error::Expired => StatusCode::GONE,
            Error::Malformed { .. } | Error::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Corrupt { .. } | DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Locked { retry_after_secs } => {
                let minutes = (*retry_after_secs + 59) / 60;
                format!("Too many failed attempts. Try again in {minutes} minute(s)")
            }
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, .. } => match table.as_deref() {
                    Some("guest_approvals") => "An approval already exists for this guardian".to_string(),
                    Some("sessions") => "Session already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Corrupt { .. } | DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Database(DbError::Corrupt { .. }) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } | Error::Locked { .. } | Error::SignatureMismatch => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::InvalidState { .. } | Error::AlreadyResolved { .. } | Error::AlreadyReleased | Error::NotConfirmed => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::NotFound { .. } | Error::Expired | Error::Malformed { .. } | Error::ValidationFailed { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = axum::response::Json(serde_json::json!({ "message": self.user_message() }));

        match &self {
            Error::Locked { retry_after_secs } => {
                let mut response = (status, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&(*retry_after_secs).max(0).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
