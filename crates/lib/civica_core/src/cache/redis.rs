//! Redis-backed [`KvCache`] (`SET ... PX`, `GET`, `DEL`).
//!
//! Shared across service instances, so revocation is visible cluster-wide.
//! `DEL` returns the number of keys removed, which gives the atomic
//! "who consumed it" answer the rotation protocol needs.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CacheError, CacheResult, KvCache};

#[derive(Clone)]
pub struct RedisKvCache {
    conn: MultiplexedConnection,
}

impl RedisKvCache {
    /// Connect to Redis.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: impl AsRef<str>) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        // PX 0 is rejected by Redis; a zero TTL entry would be dead on arrival anyway.
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed = redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(removed > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
