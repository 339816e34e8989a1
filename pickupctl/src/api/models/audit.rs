//! API query model for the audit log.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use utoipa::IntoParams;

use super::pagination::Pagination;
use crate::db::models::audit::{AuditFilter, SubjectType};
use crate::types::UserId;

/// Filters for `GET /audit-logs`; all optional and combined with AND
#[serde_as]
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListAuditLogsQuery {
    #[param(value_type = Option<String>, format = "uuid")]
    pub actor_id: Option<UserId>,
    #[param(value_type = Option<String>)]
    pub subject_type: Option<SubjectType>,
    pub subject_id: Option<String>,
    /// Inclusive lower bound on entry time
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on entry time
    pub to: Option<DateTime<Utc>>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub is_error: Option<bool>,

    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

impl From<ListAuditLogsQuery> for AuditFilter {
    fn from(q: ListAuditLogsQuery) -> Self {
        let (skip, limit) = q.pagination.params();
        Self {
            actor_id: q.actor_id,
            subject_type: q.subject_type,
            subject_id: q.subject_id,
            from: q.from,
            to: q.to,
            is_error: q.is_error,
            skip,
            limit,
        }
    }
}
