//! Password hashing via bcrypt.

use std::sync::LazyLock;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Opaque hash-compare primitive used at login.
pub trait PasswordVerifier: Send + Sync {
    /// `Ok(false)` for a wrong password; `Err` only when the stored hash is unusable.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError>;

    /// Well-formed hash of a random secret, at production cost. Login verifies
    /// against it when an account has no hash of its own.
    fn dummy_hash(&self) -> &str;
}

/// bcrypt hash of a random value nobody knows, computed once per process.
static DUMMY_BCRYPT_HASH: LazyLock<String> = LazyLock::new(|| {
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    hash_password(&secret).unwrap_or_default()
});

/// bcrypt-backed verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct BcryptVerifier;

impl PasswordVerifier for BcryptVerifier {
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        verify_password(password, hash)
    }

    fn dummy_hash(&self) -> &str {
        &DUMMY_BCRYPT_HASH
    }
}

/// Hash a password with bcrypt (cost 10). Used by provisioning tooling.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with_cost(password, BCRYPT_COST)
}

/// Hash a password with an explicit bcrypt cost.
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}
