//! Access and refresh token issuance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::AuthError;
use super::jwt::TokenSigner;
use crate::models::auth::{AccessClaims, Audience, Role};

/// Length of a raw refresh token (alphanumeric, ~381 bits of entropy).
const REFRESH_TOKEN_LEN: usize = 64;

/// Mints signed access tokens and opaque refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    signer: Arc<dyn TokenSigner>,
    issuer: String,
    access_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(signer: Arc<dyn TokenSigner>, issuer: impl Into<String>, access_ttl: Duration) -> Self {
        Self {
            signer,
            issuer: issuer.into(),
            access_ttl,
        }
    }

    /// Sign an access token for `subject`, valid for the configured TTL from `now`.
    pub fn issue_access_token(
        &self,
        subject: Uuid,
        audience: Audience,
        roles: &[Role],
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: subject.to_string(),
            aud: audience.as_str().to_string(),
            roles: roles.to_vec(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.signer.sign(&claims)?;
        Ok((token, expires_at))
    }

    /// Generate a fresh refresh token. Returns `(raw, hash)`; only the hash may be stored.
    pub fn issue_refresh_token(&self) -> (String, String) {
        let raw = generate_refresh_token();
        let hash = hash_token(&raw);
        (raw, hash)
    }

    /// Verify an access token presented to `audience`.
    pub fn verify_access_token(&self, token: &str, audience: Audience) -> Option<AccessClaims> {
        self.signer.verify(token, audience)
    }
}

/// Generate a cryptographically random refresh token (64 alphanumeric chars).
fn generate_refresh_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a token for storage and lookup.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}
