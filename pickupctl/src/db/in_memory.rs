//! In-memory implementation of [`Store`].
//!
//! Suitable for development and tests; everything is lost on restart. Conditional writes are
//! made atomic by doing the check and the write while holding the DashMap entry guard. Guest
//! approvals live inside their request's entry so a request and its approvals become visible in
//! one insert.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::errors::{DbError, Result};
use super::models::{
    approvals::{ApprovalDecision, GuestApproval},
    audit::{AuditFilter, AuditLogEntry},
    requests::{PickupRequest, RequestFilter, RequestState},
    sessions::{AuthAttemptState, Session},
};
use super::store::Store;
use crate::types::{ApprovalId, AuditLogId, PickupRequestId, SessionId, StudentId, UserId};

#[derive(Debug, Clone)]
struct RequestEntry {
    request: PickupRequest,
    approvals: Vec<GuestApproval>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    requests: DashMap<PickupRequestId, RequestEntry>,
    approval_index: DashMap<ApprovalId, PickupRequestId>,
    /// Entries keyed by id, paired with their insertion sequence
    audit: DashMap<AuditLogId, (u64, AuditLogEntry)>,
    audit_seq: AtomicU64,
    auth_attempts: DashMap<String, AuthAttemptState>,
    sessions: DashMap<SessionId, Session>,
    session_tokens: DashMap<String, SessionId>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, skip: i64, limit: i64) -> Vec<T> {
    let skip = usize::try_from(skip).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    items.into_iter().skip(skip).take(limit).collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_request(&self, request: &PickupRequest, approvals: &[GuestApproval]) -> Result<()> {
        match self.requests.entry(request.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(DbError::UniqueViolation {
                    constraint: Some("pickup_requests_pkey".to_string()),
                    table: Some("pickup_requests".to_string()),
                    message: format!("pickup request {} already exists", request.id),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RequestEntry {
                    request: request.clone(),
                    approvals: approvals.to_vec(),
                });
            }
        }
        for approval in approvals {
            self.approval_index.insert(approval.id, request.id);
        }
        Ok(())
    }

    async fn get_request(&self, id: PickupRequestId) -> Result<Option<PickupRequest>> {
        Ok(self.requests.get(&id).map(|entry| entry.request.clone()))
    }

    async fn update_request(&self, request: &PickupRequest, expected_version: i64) -> Result<bool> {
        let Some(mut entry) = self.requests.get_mut(&request.id) else {
            return Err(DbError::NotFound);
        };
        if entry.request.version != expected_version {
            return Ok(false);
        }
        entry.request = request.clone();
        Ok(true)
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<PickupRequest>> {
        let mut matching: Vec<PickupRequest> = self
            .requests
            .iter()
            .map(|entry| entry.request.clone())
            .filter(|r| filter.student_id.is_none_or(|s| r.student_id == s))
            .filter(|r| filter.requester_id.is_none_or(|u| r.requester_id == u))
            .filter(|r| filter.state.is_none_or(|s| r.state == s))
            .collect();
        matching.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(paginate(matching, filter.skip, filter.limit))
    }

    async fn latest_confirmed_for_student(&self, student_id: StudentId) -> Result<Option<PickupRequest>> {
        Ok(self
            .requests
            .iter()
            .map(|entry| entry.request.clone())
            .filter(|r| r.student_id == student_id && r.state == RequestState::Confirmed)
            .max_by_key(|r| r.confirmed_at))
    }

    async fn get_approval(&self, id: ApprovalId) -> Result<Option<GuestApproval>> {
        let Some(request_id) = self.approval_index.get(&id).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .requests
            .get(&request_id)
            .and_then(|entry| entry.approvals.iter().find(|a| a.id == id).cloned()))
    }

    async fn list_approvals_for_request(&self, request_id: PickupRequestId) -> Result<Vec<GuestApproval>> {
        let mut approvals = self
            .requests
            .get(&request_id)
            .map(|entry| entry.approvals.clone())
            .unwrap_or_default();
        approvals.sort_by_key(|a| a.created_at);
        Ok(approvals)
    }

    async fn list_pending_approvals_for_guardian(&self, guardian_id: UserId) -> Result<Vec<GuestApproval>> {
        let mut approvals: Vec<GuestApproval> = self
            .requests
            .iter()
            .filter(|entry| entry.request.state.awaits_guardians())
            .flat_map(|entry| {
                entry
                    .approvals
                    .iter()
                    .filter(|a| a.guardian_id == guardian_id && a.is_pending())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        approvals.sort_by_key(|a| a.created_at);
        Ok(approvals)
    }

    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalDecision,
        note: Option<&str>,
        responded_at: DateTime<Utc>,
    ) -> Result<Option<GuestApproval>> {
        let Some(request_id) = self.approval_index.get(&id).map(|r| *r) else {
            return Err(DbError::NotFound);
        };
        let Some(mut entry) = self.requests.get_mut(&request_id) else {
            return Err(DbError::NotFound);
        };
        let Some(approval) = entry.approvals.iter_mut().find(|a| a.id == id) else {
            return Err(DbError::NotFound);
        };
        if !approval.is_pending() {
            return Ok(None);
        }
        approval.decision = decision;
        approval.note = note.map(str::to_string);
        approval.responded_at = Some(responded_at);
        Ok(Some(approval.clone()))
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        let seq = self.audit_seq.fetch_add(1, Ordering::Relaxed);
        self.audit.insert(entry.id, (seq, entry.clone()));
        Ok(())
    }

    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let mut entries: Vec<(u64, AuditLogEntry)> = self
            .audit
            .iter()
            .filter(|e| filter.matches(&e.value().1))
            .map(|e| e.value().clone())
            .collect();
        // Newest first; insertion order breaks ties within one timestamp
        entries.sort_by(|(a_seq, a), (b_seq, b)| (b.created_at, b_seq).cmp(&(a.created_at, a_seq)));
        let entries: Vec<AuditLogEntry> = entries.into_iter().map(|(_, entry)| entry).collect();
        Ok(paginate(entries, filter.skip, filter.limit))
    }

    async fn get_auth_attempts(&self, identity: &str) -> Result<Option<AuthAttemptState>> {
        Ok(self.auth_attempts.get(identity).map(|s| s.clone()))
    }

    async fn record_auth_failure(
        &self,
        identity: &str,
        threshold: i32,
        lock_for: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<AuthAttemptState> {
        let mut state = self
            .auth_attempts
            .entry(identity.to_string())
            .or_insert_with(|| AuthAttemptState::cleared(identity));

        if state.lock_expired(now) {
            state.failed_attempts = 0;
            state.locked_until = None;
        }
        state.failed_attempts += 1;
        state.last_failure_at = Some(now);
        if state.failed_attempts >= threshold && state.locked_until.is_none() {
            state.locked_until = Some(now + lock_for);
        }
        Ok(state.clone())
    }

    async fn reset_auth_attempts(&self, identity: &str) -> Result<()> {
        self.auth_attempts.remove(identity);
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        if self.session_tokens.contains_key(&session.token_hash) {
            return Err(DbError::UniqueViolation {
                constraint: Some("sessions_token_hash_key".to_string()),
                table: Some("sessions".to_string()),
                message: "duplicate session token".to_string(),
            });
        }
        self.sessions.insert(session.id, session.clone());
        self.session_tokens.insert(session.token_hash.clone(), session.id);
        Ok(())
    }

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let Some(id) = self.session_tokens.get(token_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut session) = self.sessions.get_mut(&id)
            && session.last_activity_at < at
        {
            session.last_activity_at = at;
        }
        Ok(())
    }

    async fn list_active_sessions(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active(now))
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn revoke_session(&self, id: SessionId, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Err(DbError::NotFound);
        };
        if session.is_revoked() {
            return Ok(false);
        }
        session.revoked_at = Some(at);
        session.revoke_reason = Some(reason.to_string());
        Ok(true)
    }

    async fn revoke_sessions_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<SessionId>> {
        let mut revoked = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if session.user_id == user_id && Some(session.id) != except && session.is_active(at) {
                session.revoked_at = Some(at);
                session.revoke_reason = Some(reason.to_string());
                revoked.push(session.id);
            }
        }
        Ok(revoked)
    }
}
