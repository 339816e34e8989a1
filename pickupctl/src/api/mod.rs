//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is served under `/api/v1`:
//!
//! - **Authentication** (`/authentication/*`, `/sessions/*`): Login, logout, session revocation
//! - **Requests** (`/requests/*`): Pickup request lifecycle and verification tokens
//! - **Approvals** (`/approvals/*`): Guardian decisions on guest pickups
//! - **Gate** (`/verify/*`, `/emergency-releases`): Guard verification and emergency release
//! - **Audit** (`/audit-logs`): Administrator access to the audit trail
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The interactive reference is served
//! at `/docs`.

pub mod handlers;
pub mod models;
