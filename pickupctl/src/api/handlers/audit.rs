use axum::{
    Json,
    extract::{Query, State},
};

use crate::AppState;
use crate::api::models::audit::ListAuditLogsQuery;
use crate::auth::current_user::CurrentUser;
use crate::db::models::audit::{AuditFilter, AuditLogEntry, SubjectType};
use crate::directory::Role;
use crate::errors::Result;

#[utoipa::path(
    get,
    path = "/audit-logs",
    tag = "audit",
    summary = "Query the audit log",
    description = "Administrators only. Newest first.",
    params(ListAuditLogsQuery),
    responses(
        (status = 200, description = "Audit entries", body = Vec<AuditLogEntry>),
        (status = 403, description = "Administrators only"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListAuditLogsQuery>,
) -> Result<Json<Vec<AuditLogEntry>>> {
    if current_user.role != Role::Admin {
        return Err(state
            .audit
            .deny(&current_user.actor(), SubjectType::AuditLog, "audit-logs", "read the audit log")
            .await);
    }
    let filter: AuditFilter = query.into();
    Ok(Json(state.audit.query(&filter).await?))
}
