//! Storage abstraction over pickup requests, approvals, audit, sessions and lockout counters.
//!
//! Every mutation that participates in a state machine is conditional: request updates are
//! keyed on the version the caller read, approval decisions are keyed on the approval still
//! being pending, and failed-attempt counters are updated in a single atomic step. Callers
//! detect a lost race from the return value and re-read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::Result;
use super::models::{
    approvals::{ApprovalDecision, GuestApproval},
    audit::{AuditFilter, AuditLogEntry},
    requests::{PickupRequest, RequestFilter},
    sessions::{AuthAttemptState, Session},
};
use crate::types::{ApprovalId, PickupRequestId, SessionId, StudentId, UserId};

#[async_trait]
pub trait Store: Send + Sync {
    // ----- pickup requests -----

    /// Insert a new request together with its guest approvals. Either all rows become visible or
    /// none do.
    async fn insert_request(&self, request: &PickupRequest, approvals: &[GuestApproval]) -> Result<()>;

    async fn get_request(&self, id: PickupRequestId) -> Result<Option<PickupRequest>>;

    /// Replace the stored request if its version still equals `expected_version`.
    ///
    /// The caller is responsible for having bumped `request.version`. Returns `false` when the
    /// stored version moved on (a concurrent writer won) and nothing was written.
    async fn update_request(&self, request: &PickupRequest, expected_version: i64) -> Result<bool>;

    /// Newest first by `requested_at`.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<PickupRequest>>;

    /// Most recently confirmed request for the student that has not been released.
    async fn latest_confirmed_for_student(&self, student_id: StudentId) -> Result<Option<PickupRequest>>;

    // ----- guest approvals -----

    async fn get_approval(&self, id: ApprovalId) -> Result<Option<GuestApproval>>;

    async fn list_approvals_for_request(&self, request_id: PickupRequestId) -> Result<Vec<GuestApproval>>;

    async fn list_pending_approvals_for_guardian(&self, guardian_id: UserId) -> Result<Vec<GuestApproval>>;

    /// Record a decision if the approval is still pending. Returns the updated approval, or
    /// `None` if it was already decided.
    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalDecision,
        note: Option<&str>,
        responded_at: DateTime<Utc>,
    ) -> Result<Option<GuestApproval>>;

    // ----- audit -----

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Newest first.
    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;

    // ----- failed login attempts -----

    async fn get_auth_attempts(&self, identity: &str) -> Result<Option<AuthAttemptState>>;

    /// Atomically count one failure for `identity`.
    ///
    /// A lock that has already expired is cleared before counting. When the count reaches
    /// `threshold`, `locked_until` is set to `now + lock_for`.
    async fn record_auth_failure(
        &self,
        identity: &str,
        threshold: i32,
        lock_for: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<AuthAttemptState>;

    async fn reset_auth_attempts(&self, identity: &str) -> Result<()>;

    // ----- sessions -----

    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>>;

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<()>;

    /// Sessions for the user that are neither revoked nor expired at `now`.
    async fn list_active_sessions(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Returns `false` if the session was already revoked.
    async fn revoke_session(&self, id: SessionId, reason: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Revoke every live session of the user except `except`. Returns the revoked ids.
    async fn revoke_sessions_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<SessionId>>;
}
