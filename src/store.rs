//! Fast Store abstraction and its Redis implementation

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::CacheError;

/// Key-value store with per-key expiry and atomic increment.
///
/// Implementations must make `increment` atomic with respect to concurrent
/// callers on the same key; the coordinator never does read-modify-write.
#[async_trait]
pub trait FastStore: Send + Sync + 'static {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Overwrite `key` with `value`, expiring after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Increment the integer at `key` by one, creating it as 1 when absent
    async fn increment(&self, key: &str) -> Result<i64, CacheError>;
}

/// Redis-backed Fast Store.
///
/// Wraps a `ConnectionManager`, which reconnects on its own and is cheap to
/// clone for each command.
#[derive(Clone)]
pub struct RedisStore {
    redis: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Create a store from an existing client
    pub async fn new(redis_client: redis::Client) -> Result<Self, redis::RedisError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self { redis })
    }

    /// Open a client for `url` (e.g. `redis://redis:6379`) and connect
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        Self::new(redis::Client::open(url)?).await
    }

    /// Round-trip a PING
    pub async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl FastStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        // SETEX rejects a zero expiry
        let ttl_seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        debug!("SETEX {} ({}s)", key, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.incr::<_, _, i64>(key, 1).await?)
    }
}
