//! Audit log records. Write-once; there is no update or delete path.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{AuditLogId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Approve,
    Reject,
    Complete,
    Cancel,
    Review,
    TokenIssued,
    Login,
    LoginFailed,
    AccountLocked,
    Logout,
    SessionRevoked,
    AccessDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    PickupRequest,
    GuestApproval,
    Session,
    /// Login identity (email), which may not correspond to a known user
    Identity,
    AuditLog,
}

/// Caller network origin attached to audit entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct AuditLogEntry {
    #[schema(value_type = String, format = "uuid")]
    pub id: AuditLogId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub actor_id: Option<UserId>,
    pub action: AuditAction,
    pub subject_type: SubjectType,
    pub subject_id: String,
    #[schema(value_type = Option<Object>)]
    pub before: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub after: Option<serde_json::Value>,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: Option<i32>,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An entry to be appended. `id` and `created_at` are assigned on write.
#[derive(Debug, Clone, Builder)]
pub struct NewAuditEntry {
    pub actor_id: Option<UserId>,
    pub action: AuditAction,
    pub subject_type: SubjectType,
    #[builder(into)]
    pub subject_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    #[builder(into)]
    pub description: String,
    #[builder(default)]
    pub origin: Origin,
    pub status_code: Option<i32>,
    #[builder(default)]
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl NewAuditEntry {
    pub fn into_entry(self, created_at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: uuid::Uuid::new_v4(),
            actor_id: self.actor_id,
            action: self.action,
            subject_type: self.subject_type,
            subject_id: self.subject_id,
            before: self.before,
            after: self.after,
            description: self.description,
            ip_address: self.origin.ip_address,
            user_agent: self.origin.user_agent,
            status_code: self.status_code,
            is_error: self.is_error,
            error_message: self.error_message,
            created_at,
        }
    }
}

/// Audit query filter; all fields optional and combined with AND
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<UserId>,
    pub subject_type: Option<SubjectType>,
    pub subject_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub is_error: Option<bool>,
    pub skip: i64,
    pub limit: i64,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.is_none_or(|a| entry.actor_id == Some(a))
            && self.subject_type.is_none_or(|t| entry.subject_type == t)
            && self.subject_id.as_deref().is_none_or(|s| entry.subject_id == s)
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at <= to)
            && self.is_error.is_none_or(|e| entry.is_error == e)
    }
}
