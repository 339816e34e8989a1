//! HTTP request handlers for all API endpoints.
//!
//! Handlers extract the caller with [`CurrentUser`](crate::auth::current_user::CurrentUser),
//! delegate to the pickup services on [`AppState`](crate::AppState), and convert storage records
//! into response models. Authorization decisions live in the services, not here.
//!
//! - [`auth`]: Login and logout
//! - [`sessions`]: Session listing and revocation
//! - [`requests`]: Pickup request lifecycle and verification tokens
//! - [`approvals`]: Guardian decisions on guest pickups
//! - [`verify`]: Guard verification and emergency release
//! - [`audit`]: Audit log queries

pub mod approvals;
pub mod audit;
pub mod auth;
pub mod requests;
pub mod sessions;
pub mod verify;
