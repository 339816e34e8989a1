//! Authentication: credential checks, failed-login lockout and bearer sessions.
//!
//! # Flow
//!
//! `POST /authentication/login` runs through [`login::Authenticator`]:
//!
//! 1. [`lockout::LockoutGuard`] is consulted first. A locked identity is refused without its
//!    credentials being checked.
//! 2. An [`identity::IdentityVerifier`] checks the credentials. The shipped verifier compares
//!    against Argon2 hashes held in the directory.
//! 3. Failures are counted per identity (known or not). Success resets the count and
//!    [`session::SessionRegistry`] issues an opaque bearer token.
//!
//! Every other route authenticates with `Authorization: Bearer <token>` through the
//! [`current_user::CurrentUser`] extractor.
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for the authenticated caller and their network origin
//! - [`identity`]: Credential verification
//! - [`lockout`]: Consecutive-failure counting and temporary locks
//! - [`login`]: Login and logout orchestration
//! - [`password`]: Password hashing and verification using Argon2
//! - [`session`]: Session issue, validation, enumeration and revocation

pub mod current_user;
pub mod identity;
pub mod lockout;
pub mod login;
pub mod password;
pub mod session;
