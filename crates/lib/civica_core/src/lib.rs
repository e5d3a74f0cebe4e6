//! # civica_core
//!
//! Session and credential lifecycle for Civica: access/refresh token issuance
//! and rotation for the backoffice and citizen audiences, role derivation from
//! relational grants, and passkey credentials with clone detection.
//!
//! Everything the HTTP layer may call goes through [`auth::session::SessionManager`]
//! or [`auth::passkeys::PasskeyManager`]; storage and cache backends are injected
//! as trait objects.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod migrate;
pub mod models;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
