//! Storage layer.
//!
//! ```text
//! ┌──────────────┐
//! │   Services   │  (pickup workflow, approvals, tokens, sessions, lockout, audit)
//! └──────┬───────┘
//!        │ Arc<dyn Store>
//!        ↓
//! ┌──────────────┐      ┌──────────────┐
//! │ InMemoryStore│  or  │ PostgresStore│
//! └──────────────┘      └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`store`]: The [`store::Store`] trait every backend implements
//! - [`models`]: Records shared by both backends
//! - [`in_memory`]: DashMap-backed store for development and tests
//! - [`postgres`]: PostgreSQL store, schema in `migrations/`
//! - [`errors`]: Storage error types

pub mod errors;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod store;
