//! Authentication and session lifecycle.
//!
//! Token issuance, password verification, role resolution, passkeys and the
//! session manager that composes them. Shared by the HTTP layer and the CLI.

pub mod jwt;
pub mod passkeys;
pub mod password;
pub mod roles;
pub mod session;
pub mod tokens;

use thiserror::Error;

use crate::cache::CacheError;
use crate::context::Interrupted;
use crate::store::StoreError;

/// Authentication errors.
///
/// The first five variants are the authentication-decision sentinels the HTTP
/// layer maps to 401/403. Their messages never say which check failed, so
/// "unknown email" and "wrong password" are indistinguishable to a client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("No eligible roles")]
    NoEligibleRoles,

    #[error("Invalid refresh token")]
    RefreshInvalid,

    #[error("Passkey signature counter regressed; credential may be cloned")]
    ClonedCredential,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("{0}")]
    Interrupted(#[from] Interrupted),

    #[error("Internal error")]
    Store(#[source] StoreError),

    #[error("Internal error")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for the authentication-decision sentinels (401/403 class).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::AccountDisabled
                | Self::NoEligibleRoles
                | Self::RefreshInvalid
                | Self::ClonedCredential
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => AuthError::NotFound(msg),
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            other => AuthError::Store(other),
        }
    }
}

/// First 12 hex chars of a token hash, for log correlation.
pub(crate) fn hash_prefix(token_hash: &str) -> &str {
    token_hash.get(..12).unwrap_or(token_hash)
}
