//! PostgreSQL implementation of [`Store`].
//!
//! Request updates are `UPDATE ... WHERE id = $1 AND version = $n`; approval decisions are
//! `UPDATE ... WHERE decision = 'pending'`; failed-attempt counters use a single
//! `INSERT ... ON CONFLICT DO UPDATE` with the lock arithmetic in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, postgres::PgArguments, query::Query};
use tracing::instrument;

use super::errors::{DbError, Result};
use super::models::{
    approvals::{ApprovalDecision, GuestApproval},
    audit::{AuditFilter, AuditLogEntry},
    requests::{
        EmergencyContact, GuestDetails, PickupRequest, ReleaseMethod, ReleaseRecord, RequestFilter, RequestKind, RequestState,
        TokenRecord,
    },
    sessions::{AuthAttemptState, Session},
};
use super::store::Store;
use crate::types::{ApprovalId, PickupRequestId, SessionId, StudentId, UserId, abbrev_uuid};

const REQUEST_COLUMNS: &str = "id, student_id, requester_id, pickup_person_id, kind, state, requested_at, scheduled_at, \
    released_at, rejection_reason, guest_name, guest_phone, guest_external_id, release_method, released_by, \
    release_notes, photo_verified, confirmed_by, confirmed_at, token_signature, token_issued_at, token_expires_at, \
    emergency_name, emergency_phone, emergency_relationship, emergency_reason, requires_review, reviewed_by, \
    reviewed_at, version, updated_at, emergency_notes";

const SESSION_COLUMNS: &str =
    "id, token_hash, user_id, issued_at, expires_at, last_activity_at, revoked_at, revoke_reason, device_label, user_agent, ip_address";

const APPROVAL_COLUMNS: &str = "id, request_id, guardian_id, decision, note, responded_at, created_at";

/// Flat row shape of `pickup_requests`
#[derive(Debug, sqlx::FromRow)]
struct PickupRequestRow {
    id: PickupRequestId,
    student_id: StudentId,
    requester_id: UserId,
    pickup_person_id: Option<UserId>,
    kind: RequestKind,
    state: RequestState,
    requested_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    guest_name: Option<String>,
    guest_phone: Option<String>,
    guest_external_id: Option<String>,
    release_method: Option<ReleaseMethod>,
    released_by: Option<UserId>,
    release_notes: Option<String>,
    photo_verified: bool,
    confirmed_by: Option<UserId>,
    confirmed_at: Option<DateTime<Utc>>,
    token_signature: Option<String>,
    token_issued_at: Option<DateTime<Utc>>,
    token_expires_at: Option<DateTime<Utc>>,
    emergency_name: Option<String>,
    emergency_phone: Option<String>,
    emergency_relationship: Option<String>,
    emergency_reason: Option<String>,
    emergency_notes: Option<String>,
    requires_review: bool,
    reviewed_by: Option<UserId>,
    reviewed_at: Option<DateTime<Utc>>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PickupRequestRow> for PickupRequest {
    type Error = DbError;

    fn try_from(row: PickupRequestRow) -> Result<Self> {
        let guest = match (row.guest_name, row.guest_phone) {
            (Some(name), Some(phone)) => Some(GuestDetails {
                name,
                phone,
                external_id: row.guest_external_id,
            }),
            (None, None) => None,
            _ => {
                return Err(DbError::Corrupt {
                    column: "guest_name",
                    value: format!("incomplete guest details on {}", row.id),
                });
            }
        };

        let release = match (row.release_method, row.released_by) {
            (Some(method), Some(released_by)) => Some(ReleaseRecord {
                method,
                released_by,
                notes: row.release_notes,
                photo_verified: row.photo_verified,
            }),
            (None, _) => None,
            (Some(_), None) => {
                return Err(DbError::Corrupt {
                    column: "released_by",
                    value: format!("release without agent on {}", row.id),
                });
            }
        };

        let token = match (row.token_signature, row.token_issued_at, row.token_expires_at) {
            (Some(signature), Some(issued_at), Some(expires_at)) => Some(TokenRecord {
                signature,
                issued_at,
                expires_at,
            }),
            _ => None,
        };

        let emergency = match (row.emergency_name, row.emergency_phone, row.emergency_relationship, row.emergency_reason) {
            (Some(name), Some(phone), Some(relationship), Some(reason)) => Some(EmergencyContact {
                name,
                phone,
                relationship,
                reason,
                notes: row.emergency_notes,
            }),
            _ => None,
        };

        Ok(PickupRequest {
            id: row.id,
            student_id: row.student_id,
            requester_id: row.requester_id,
            pickup_person_id: row.pickup_person_id,
            kind: row.kind,
            state: row.state,
            requested_at: row.requested_at,
            scheduled_at: row.scheduled_at,
            released_at: row.released_at,
            rejection_reason: row.rejection_reason,
            guest,
            release,
            confirmed_by: row.confirmed_by,
            confirmed_at: row.confirmed_at,
            token,
            emergency,
            requires_review: row.requires_review,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

/// Bind all request columns as `$1..$32`, in `REQUEST_COLUMNS` order.
fn bind_request<'q>(query: Query<'q, Postgres, PgArguments>, r: &'q PickupRequest) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(r.id)
        .bind(r.student_id)
        .bind(r.requester_id)
        .bind(r.pickup_person_id)
        .bind(r.kind)
        .bind(r.state)
        .bind(r.requested_at)
        .bind(r.scheduled_at)
        .bind(r.released_at)
        .bind(r.rejection_reason.as_deref())
        .bind(r.guest.as_ref().map(|g| g.name.as_str()))
        .bind(r.guest.as_ref().map(|g| g.phone.as_str()))
        .bind(r.guest.as_ref().and_then(|g| g.external_id.as_deref()))
        .bind(r.release.as_ref().map(|rel| rel.method))
        .bind(r.release.as_ref().map(|rel| rel.released_by))
        .bind(r.release.as_ref().and_then(|rel| rel.notes.as_deref()))
        .bind(r.release.as_ref().is_some_and(|rel| rel.photo_verified))
        .bind(r.confirmed_by)
        .bind(r.confirmed_at)
        .bind(r.token.as_ref().map(|t| t.signature.as_str()))
        .bind(r.token.as_ref().map(|t| t.issued_at))
        .bind(r.token.as_ref().map(|t| t.expires_at))
        .bind(r.emergency.as_ref().map(|e| e.name.as_str()))
        .bind(r.emergency.as_ref().map(|e| e.phone.as_str()))
        .bind(r.emergency.as_ref().map(|e| e.relationship.as_str()))
        .bind(r.emergency.as_ref().map(|e| e.reason.as_str()))
        .bind(r.requires_review)
        .bind(r.reviewed_by)
        .bind(r.reviewed_at)
        .bind(r.version)
        .bind(r.updated_at)
        .bind(r.emergency.as_ref().and_then(|e| e.notes.as_deref()))
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, request, approvals), fields(request_id = %abbrev_uuid(&request.id), approvals = approvals.len()), err)]
    async fn insert_request(&self, request: &PickupRequest, approvals: &[GuestApproval]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO pickup_requests ({REQUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
             $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32)"
        );
        bind_request(sqlx::query(&sql), request).execute(&mut *tx).await?;

        for approval in approvals {
            sqlx::query(&format!(
                "INSERT INTO guest_approvals ({APPROVAL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(approval.id)
            .bind(approval.request_id)
            .bind(approval.guardian_id)
            .bind(approval.decision)
            .bind(approval.note.as_deref())
            .bind(approval.responded_at)
            .bind(approval.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&id)), err)]
    async fn get_request(&self, id: PickupRequestId) -> Result<Option<PickupRequest>> {
        let row = sqlx::query_as::<_, PickupRequestRow>(&format!("SELECT {REQUEST_COLUMNS} FROM pickup_requests WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PickupRequest::try_from).transpose()
    }

    #[instrument(skip(self, request), fields(request_id = %abbrev_uuid(&request.id)), err)]
    async fn update_request(&self, request: &PickupRequest, expected_version: i64) -> Result<bool> {
        let sql = "UPDATE pickup_requests SET student_id = $2, requester_id = $3, pickup_person_id = $4, kind = $5, \
             state = $6, requested_at = $7, scheduled_at = $8, released_at = $9, rejection_reason = $10, guest_name = $11, \
             guest_phone = $12, guest_external_id = $13, release_method = $14, released_by = $15, release_notes = $16, \
             photo_verified = $17, confirmed_by = $18, confirmed_at = $19, token_signature = $20, token_issued_at = $21, \
             token_expires_at = $22, emergency_name = $23, emergency_phone = $24, emergency_relationship = $25, \
             emergency_reason = $26, requires_review = $27, reviewed_by = $28, reviewed_at = $29, version = $30, \
             updated_at = $31, emergency_notes = $32 WHERE id = $1 AND version = $33";

        let result = bind_request(sqlx::query(sql), request)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pickup_requests WHERE id = $1)")
            .bind(request.id)
            .fetch_one(&self.pool)
            .await?;
        if exists { Ok(false) } else { Err(DbError::NotFound) }
    }

    #[instrument(skip(self, filter), err)]
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<PickupRequest>> {
        let rows = sqlx::query_as::<_, PickupRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM pickup_requests \
             WHERE ($1::uuid IS NULL OR student_id = $1) \
               AND ($2::uuid IS NULL OR requester_id = $2) \
               AND ($3::text IS NULL OR state = $3) \
             ORDER BY requested_at DESC OFFSET $4 LIMIT $5"
        ))
        .bind(filter.student_id)
        .bind(filter.requester_id)
        .bind(filter.state)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PickupRequest::try_from).collect()
    }

    #[instrument(skip(self), fields(student_id = %abbrev_uuid(&student_id)), err)]
    async fn latest_confirmed_for_student(&self, student_id: StudentId) -> Result<Option<PickupRequest>> {
        let row = sqlx::query_as::<_, PickupRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM pickup_requests \
             WHERE student_id = $1 AND state = 'confirmed' \
             ORDER BY confirmed_at DESC NULLS LAST LIMIT 1"
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PickupRequest::try_from).transpose()
    }

    #[instrument(skip(self), fields(approval_id = %abbrev_uuid(&id)), err)]
    async fn get_approval(&self, id: ApprovalId) -> Result<Option<GuestApproval>> {
        Ok(
            sqlx::query_as::<_, GuestApproval>(&format!("SELECT {APPROVAL_COLUMNS} FROM guest_approvals WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&request_id)), err)]
    async fn list_approvals_for_request(&self, request_id: PickupRequestId) -> Result<Vec<GuestApproval>> {
        Ok(sqlx::query_as::<_, GuestApproval>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM guest_approvals WHERE request_id = $1 ORDER BY created_at"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self), fields(guardian_id = %abbrev_uuid(&guardian_id)), err)]
    async fn list_pending_approvals_for_guardian(&self, guardian_id: UserId) -> Result<Vec<GuestApproval>> {
        Ok(sqlx::query_as::<_, GuestApproval>(
            "SELECT a.id, a.request_id, a.guardian_id, a.decision, a.note, a.responded_at, a.created_at \
             FROM guest_approvals a JOIN pickup_requests r ON r.id = a.request_id \
             WHERE a.guardian_id = $1 AND a.decision = 'pending' \
               AND r.state IN ('pending_parent_approval', 'pending') \
             ORDER BY a.created_at",
        )
        .bind(guardian_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, note), fields(approval_id = %abbrev_uuid(&id)), err)]
    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalDecision,
        note: Option<&str>,
        responded_at: DateTime<Utc>,
    ) -> Result<Option<GuestApproval>> {
        let updated = sqlx::query_as::<_, GuestApproval>(&format!(
            "UPDATE guest_approvals SET decision = $2, note = $3, responded_at = $4 \
             WHERE id = $1 AND decision = 'pending' RETURNING {APPROVAL_COLUMNS}"
        ))
        .bind(id)
        .bind(decision)
        .bind(note)
        .bind(responded_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(approval) => Ok(Some(approval)),
            None => match self.get_approval(id).await? {
                Some(_) => Ok(None),
                None => Err(DbError::NotFound),
            },
        }
    }

    #[instrument(skip(self, entry), fields(action = ?entry.action), err)]
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, actor_id, action, subject_type, subject_id, before, after, description, \
             ip_address, user_agent, status_code, is_error, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(entry.action)
        .bind(entry.subject_type)
        .bind(&entry.subject_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.description)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.status_code)
        .bind(entry.is_error)
        .bind(entry.error_message.as_deref())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, filter), err)]
    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        Ok(sqlx::query_as::<_, AuditLogEntry>(
            "SELECT id, actor_id, action, subject_type, subject_id, before, after, description, ip_address, \
             user_agent, status_code, is_error, error_message, created_at FROM audit_logs \
             WHERE ($1::uuid IS NULL OR actor_id = $1) \
               AND ($2::text IS NULL OR subject_type = $2) \
               AND ($3::text IS NULL OR subject_id = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5) \
               AND ($6::boolean IS NULL OR is_error = $6) \
             ORDER BY created_at DESC, seq DESC OFFSET $7 LIMIT $8",
        )
        .bind(filter.actor_id)
        .bind(filter.subject_type)
        .bind(filter.subject_id.as_deref())
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.is_error)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self), err)]
    async fn get_auth_attempts(&self, identity: &str) -> Result<Option<AuthAttemptState>> {
        Ok(sqlx::query_as::<_, AuthAttemptState>(
            "SELECT identity, failed_attempts, locked_until, last_failure_at FROM auth_attempts WHERE identity = $1",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self), err)]
    async fn record_auth_failure(
        &self,
        identity: &str,
        threshold: i32,
        lock_for: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<AuthAttemptState> {
        let lock_until = now + lock_for;
        Ok(sqlx::query_as::<_, AuthAttemptState>(
            "INSERT INTO auth_attempts AS a (identity, failed_attempts, locked_until, last_failure_at) \
             VALUES ($1, 1, CASE WHEN $2 <= 1 THEN $4::timestamptz END, $3) \
             ON CONFLICT (identity) DO UPDATE SET \
                failed_attempts = CASE \
                    WHEN a.locked_until IS NOT NULL AND a.locked_until <= $3 THEN 1 \
                    ELSE a.failed_attempts + 1 END, \
                locked_until = CASE \
                    WHEN a.locked_until IS NOT NULL AND a.locked_until <= $3 \
                        THEN CASE WHEN $2 <= 1 THEN $4::timestamptz END \
                    WHEN a.locked_until IS NOT NULL THEN a.locked_until \
                    WHEN a.failed_attempts + 1 >= $2 THEN $4::timestamptz \
                    ELSE NULL END, \
                last_failure_at = $3 \
             RETURNING identity, failed_attempts, locked_until, last_failure_at",
        )
        .bind(identity)
        .bind(threshold)
        .bind(now)
        .bind(lock_until)
        .fetch_one(&self.pool)
        .await?)
    }

    #[instrument(skip(self), err)]
    async fn reset_auth_attempts(&self, identity: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_attempts WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %abbrev_uuid(&session.id)), err)]
    async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(session.id)
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.last_activity_at)
        .bind(session.revoked_at)
        .bind(session.revoke_reason.as_deref())
        .bind(session.device_label.as_deref())
        .bind(session.user_agent.as_deref())
        .bind(session.ip_address.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, token_hash), err)]
    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        Ok(
            sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1"))
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(
            sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity_at = $2 WHERE id = $1 AND last_activity_at < $2")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn list_active_sessions(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Session>> {
        Ok(sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 \
             ORDER BY last_activity_at DESC"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    async fn revoke_session(&self, id: SessionId, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = $2, revoke_reason = $3 WHERE id = $1 AND revoked_at IS NULL")
            .bind(id)
            .bind(at)
            .bind(reason)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_session(id).await? {
            Some(_) => Ok(false),
            None => Err(DbError::NotFound),
        }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn revoke_sessions_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<SessionId>> {
        Ok(sqlx::query_scalar::<_, SessionId>(
            "UPDATE sessions SET revoked_at = $3, revoke_reason = $4 \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $3 \
               AND ($2::uuid IS NULL OR id <> $2) \
             RETURNING id",
        )
        .bind(user_id)
        .bind(except)
        .bind(at)
        .bind(reason)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests as shared;

    // These need a live database: DATABASE_URL=postgres://... cargo test -- --ignored

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_update_request_is_conditional_on_version(pool: PgPool) {
        shared::update_request_is_conditional_on_version(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_request_and_approvals_inserted_together(pool: PgPool) {
        shared::request_and_approvals_inserted_together(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_resolve_approval_only_once(pool: PgPool) {
        shared::resolve_approval_only_once(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_auth_failures_lock_and_expire(pool: PgPool) {
        shared::auth_failures_lock_and_expire(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_session_revocation(pool: PgPool) {
        shared::session_revocation(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_audit_query_filters(pool: PgPool) {
        shared::audit_query_filters(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_latest_confirmed_for_student(pool: PgPool) {
        shared::latest_confirmed_for_student(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_pending_approvals_follow_request_state(pool: PgPool) {
        shared::pending_approvals_follow_request_state(&PostgresStore::new(pool)).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn test_audit_ties_keep_insertion_order(pool: PgPool) {
        shared::audit_ties_keep_insertion_order(&PostgresStore::new(pool)).await;
    }
}
