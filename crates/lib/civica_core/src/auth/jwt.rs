//! Access-token signing and verification.

use std::path::PathBuf;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info};

use super::AuthError;
use crate::models::auth::{AccessClaims, Audience};

/// Opaque signing primitive. Key management lives outside the core.
pub trait TokenSigner: Send + Sync {
    /// Sign a claim set. Fails only on key misconfiguration.
    fn sign(&self, claims: &AccessClaims) -> Result<String, AuthError>;

    /// Verify signature, expiry, issuer and audience; `None` on any failure.
    fn verify(&self, token: &str, audience: Audience) -> Option<AccessClaims>;
}

/// HMAC-SHA256 signer over a shared secret.
pub struct Hs256Signer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl Hs256Signer {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::TokenError("empty signing secret".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
        })
    }
}

impl TokenSigner for Hs256Signer {
    fn sign(&self, claims: &AccessClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
    }

    fn verify(&self, token: &str, audience: Audience) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_audience(&[audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        match decode::<AccessClaims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, %audience, "access token rejected");
                None
            }
        }
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    // Generate and persist
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("civica")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::auth::Role;

    fn claims(aud: Audience, exp_offset: Duration) -> AccessClaims {
        let now = Utc::now();
        AccessClaims {
            sub: "subject-1".into(),
            aud: aud.as_str().into(),
            roles: vec![Role::Professor],
            iss: "civica".into(),
            iat: now.timestamp(),
            exp: (now + exp_offset).timestamp(),
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            Hs256Signer::new(b"", "civica"),
            Err(AuthError::TokenError(_))
        ));
    }

    #[test]
    fn signed_token_verifies_for_its_audience_only() {
        let signer = Hs256Signer::new(b"test-secret", "civica").unwrap();
        let token = signer
            .sign(&claims(Audience::Backoffice, Duration::minutes(5)))
            .unwrap();

        let verified = signer.verify(&token, Audience::Backoffice).unwrap();
        assert_eq!(verified.sub, "subject-1");
        assert_eq!(verified.roles, vec![Role::Professor]);
        assert!(signer.verify(&token, Audience::Citizen).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = Hs256Signer::new(b"test-secret", "civica").unwrap();
        let token = signer
            .sign(&claims(Audience::Citizen, Duration::minutes(-5)))
            .unwrap();
        assert!(signer.verify(&token, Audience::Citizen).is_none());
    }

    #[test]
    fn foreign_issuer_or_key_is_rejected() {
        let signer = Hs256Signer::new(b"test-secret", "civica").unwrap();
        let token = signer
            .sign(&claims(Audience::Citizen, Duration::minutes(5)))
            .unwrap();

        let other_issuer = Hs256Signer::new(b"test-secret", "someone-else").unwrap();
        assert!(other_issuer.verify(&token, Audience::Citizen).is_none());

        let other_key = Hs256Signer::new(b"other-secret", "civica").unwrap();
        assert!(other_key.verify(&token, Audience::Citizen).is_none());
    }
}
