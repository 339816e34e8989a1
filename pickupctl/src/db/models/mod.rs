//! Records persisted by the storage layer.
//!
//! - [`requests`]: Pickup request aggregate and its state machine vocabulary
//! - [`approvals`]: Guest approval records
//! - [`audit`]: Append-only audit entries
//! - [`sessions`]: Login sessions and failed-attempt counters

pub mod approvals;
pub mod audit;
pub mod requests;
pub mod sessions;
