//! Session configuration.

use chrono::Duration;

use crate::auth::jwt::resolve_jwt_secret;
use crate::models::auth::Audience;

/// Default access-token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Default staff refresh-token lifetime: 12 hours (one working day).
pub const DEFAULT_STAFF_REFRESH_TTL_SECS: i64 = 12 * 60 * 60;

/// Default citizen refresh-token lifetime: 30 days.
pub const DEFAULT_CITIZEN_REFRESH_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Default JWT `iss` claim.
pub const DEFAULT_ISSUER: &str = "civica";

/// Token lifetimes and signing settings.
#[derive(Clone)]
pub struct SessionConfig {
    pub access_ttl: Duration,
    pub staff_refresh_ttl: Duration,
    pub citizen_refresh_ttl: Duration,
    pub issuer: String,
    /// HMAC signing secret.
    pub jwt_secret: String,
}

impl SessionConfig {
    /// Config with defaults and an explicit secret (tests, embedding).
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            staff_refresh_ttl: Duration::seconds(DEFAULT_STAFF_REFRESH_TTL_SECS),
            citizen_refresh_ttl: Duration::seconds(DEFAULT_CITIZEN_REFRESH_TTL_SECS),
            issuer: DEFAULT_ISSUER.to_string(),
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                          | Default                          |
    /// |-----------------------------------|----------------------------------|
    /// | `CIVICA_ACCESS_TTL_SECS`          | `900`                            |
    /// | `CIVICA_STAFF_REFRESH_TTL_SECS`   | `43200`                          |
    /// | `CIVICA_CITIZEN_REFRESH_TTL_SECS` | `2592000`                        |
    /// | `CIVICA_JWT_ISSUER`               | `civica`                         |
    /// | `JWT_SECRET` / `AUTH_SECRET`      | generated & persisted to file    |
    pub fn from_env() -> Self {
        Self {
            access_ttl: env_secs("CIVICA_ACCESS_TTL_SECS", DEFAULT_ACCESS_TTL_SECS),
            staff_refresh_ttl: env_secs(
                "CIVICA_STAFF_REFRESH_TTL_SECS",
                DEFAULT_STAFF_REFRESH_TTL_SECS,
            ),
            citizen_refresh_ttl: env_secs(
                "CIVICA_CITIZEN_REFRESH_TTL_SECS",
                DEFAULT_CITIZEN_REFRESH_TTL_SECS,
            ),
            issuer: std::env::var("CIVICA_JWT_ISSUER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            jwt_secret: resolve_jwt_secret(),
        }
    }

    pub fn refresh_ttl(&self, audience: Audience) -> Duration {
        match audience {
            Audience::Backoffice => self.staff_refresh_ttl,
            Audience::Citizen => self.citizen_refresh_ttl,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("access_ttl", &self.access_ttl)
            .field("staff_refresh_ttl", &self.staff_refresh_ttl)
            .field("citizen_refresh_ttl", &self.citizen_refresh_ttl)
            .field("issuer", &self.issuer)
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Upper bound for any configured lifetime: ten years.
const MAX_TTL_SECS: i64 = 10 * 366 * 24 * 60 * 60;

/// TTL from `var`, falling back to `default`.
fn env_secs(var: &str, default: i64) -> Duration {
    parse_secs(std::env::var(var).ok().as_deref(), default)
}

/// Accepts 1..=MAX_TTL_SECS seconds; anything else yields `default`, so
/// `now + ttl` cannot overflow later.
fn parse_secs(raw: Option<&str>, default: i64) -> Duration {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|s| (1..=MAX_TTL_SECS).contains(s))
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::try_seconds(default).unwrap_or(Duration::zero()))
}
