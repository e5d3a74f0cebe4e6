//! Fast revocation cache.
//!
//! [`KvCache`] is the minimal key/value capability (`set` with TTL, `get`,
//! `delete`). [`RevocationCache`] layers the refresh-token semantics on top:
//! one key per (audience, token hash), holding the `"active"` sentinel with a
//! TTL equal to the token's remaining lifetime. Absence always means "not
//! active", so an evicted or lagging cache can only make the core stricter.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::Audience;

/// Sentinel value stored for live refresh tokens.
pub const ACTIVE: &str = "active";

/// Key prefix for refresh-token entries.
const KEY_PREFIX: &str = "civica:refresh";

/// Cache backend errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait KvCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Current value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Remove `key` atomically. Returns `true` only for the caller that removed
    /// a live entry, which makes it usable as a race arbiter.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    fn backend_name(&self) -> &'static str;
}

/// Refresh-token view over a [`KvCache`].
#[derive(Clone)]
pub struct RevocationCache {
    kv: Arc<dyn KvCache>,
}

impl RevocationCache {
    pub fn new(kv: Arc<dyn KvCache>) -> Self {
        Self { kv }
    }

    pub fn key(audience: Audience, token_hash: &str) -> String {
        format!("{KEY_PREFIX}:{}:{token_hash}", audience.as_str())
    }

    /// Mirror a freshly issued token as active until `expires_at`.
    ///
    /// A token that is already past expiry is not written at all.
    pub async fn mark_active(
        &self,
        audience: Audience,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CacheResult<()> {
        let Some(ttl) = remaining_ttl(expires_at, now) else {
            return Ok(());
        };
        self.kv
            .set(&Self::key(audience, token_hash), ACTIVE, ttl)
            .await
    }

    pub async fn is_active(&self, audience: Audience, token_hash: &str) -> CacheResult<bool> {
        let value = self.kv.get(&Self::key(audience, token_hash)).await?;
        Ok(value.as_deref() == Some(ACTIVE))
    }

    /// Atomically consume the active marker. Only one concurrent caller gets `true`.
    pub async fn take(&self, audience: Audience, token_hash: &str) -> CacheResult<bool> {
        self.kv.delete(&Self::key(audience, token_hash)).await
    }

    /// Remove the marker, treating "already absent" as success.
    pub async fn remove(&self, audience: Audience, token_hash: &str) -> CacheResult<()> {
        self.kv.delete(&Self::key(audience, token_hash)).await?;
        Ok(())
    }

    pub fn backend_name(&self) -> &'static str {
        self.kv.backend_name()
    }
}

/// Time left until `expires_at`, or `None` if nothing remains.
fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (expires_at - now)
        .to_std()
        .ok()
        .filter(|ttl| !ttl.is_zero())
}
