//! API request and response models.
//!
//! Storage records are never serialized to clients directly; each has a response type here that
//! omits secrets (token signatures, session token hashes, password hashes).

pub mod approvals;
pub mod audit;
pub mod auth;
pub mod pagination;
pub mod requests;
