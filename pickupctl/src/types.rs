//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases. Records reference each other only through
//! these ids; there are no live back-references between requests, students, guardians and
//! approvals.
//!
//! - [`UserId`]: Directory user (guardian, teacher, admin, guard)
//! - [`StudentId`]: Student record in the directory
//! - [`PickupRequestId`]: Pickup request aggregate
//! - [`ApprovalId`]: Guest approval record
//! - [`SessionId`]: Login session
//! - [`AuditLogId`]: Audit log entry
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use uuid::Uuid;

pub type UserId = Uuid;
pub type StudentId = Uuid;
pub type PickupRequestId = Uuid;
pub type ApprovalId = Uuid;
pub type SessionId = Uuid;
pub type AuditLogId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
