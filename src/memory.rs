//! In-process stores
//!
//! `MemoryStore` stands in for Redis and `MemoryPostRepository` for Postgres,
//! for tests and single-process demos. Neither persists anything.

use std::{collections::BTreeMap, time::Duration, time::Instant};

use async_trait::async_trait;
use chrono::Utc;
use moka::{
    Expiry,
    future::Cache,
    ops::compute::{CompResult, Op},
};
use tokio::sync::RwLock;

use crate::{
    BackendError, CacheConfig, CacheError, FastStore, NewPost, Post, PostId, PostRepository,
    PostUpdate,
};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    ttl: Duration,
}

impl StoredValue {
    fn as_integer(&self) -> Option<i64> {
        std::str::from_utf8(&self.data).ok()?.parse().ok()
    }
}

/// Each write restarts the entry's own TTL, like SETEX
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed Fast Store with per-key expiry and atomic increment.
///
/// Values written with `set` live in a bounded cache and expire. Counters
/// created by `increment` live in a separate unbounded cache without expiry,
/// so capacity pressure from snapshots can never evict them.
#[derive(Clone)]
pub struct MemoryStore {
    values: Cache<String, StoredValue>,
    counters: Cache<String, i64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        let values = Cache::builder()
            .max_capacity(config.memory_max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        let counters = Cache::builder().build();
        Self { values, counters }
    }

    /// Increment an integer previously written with `set`, keeping its TTL.
    ///
    /// `None` when no such value exists.
    async fn increment_value(&self, key: &str) -> Option<Result<i64, CacheError>> {
        let result = self
            .values
            .entry(key.to_owned())
            .and_compute_with(|existing| {
                let op = match existing {
                    None => Op::Nop,
                    Some(entry) => {
                        let current = entry.into_value();
                        match current.as_integer().and_then(|n| n.checked_add(1)) {
                            Some(next) => Op::Put(StoredValue {
                                data: next.to_string().into_bytes(),
                                ttl: current.ttl,
                            }),
                            None => Op::Nop,
                        }
                    }
                };
                std::future::ready(op)
            })
            .await;

        match result {
            CompResult::StillNone(_) => None,
            CompResult::ReplacedWith(entry) => {
                Some(entry.value().as_integer().ok_or_else(|| not_an_integer(key)))
            }
            _ => Some(Err(not_an_integer(key))),
        }
    }
}

fn not_an_integer(key: &str) -> CacheError {
    CacheError::Unavailable(format!("value at {} is not an integer", key).into())
}

#[async_trait]
impl FastStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(count) = self.counters.get(key).await {
            return Ok(Some(count.to_string().into_bytes()));
        }
        Ok(self.values.get(key).await.map(|value| value.data))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.counters.invalidate(key).await;
        self.values
            .insert(key.to_owned(), StoredValue { data: value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.counters.invalidate(key).await;
        self.values.invalidate(key).await;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        if let Some(result) = self.increment_value(key).await {
            return result;
        }

        let result = self
            .counters
            .entry(key.to_owned())
            .and_compute_with(|existing| {
                let op = match existing {
                    None => Op::Put(1),
                    Some(entry) => match entry.into_value().checked_add(1) {
                        Some(next) => Op::Put(next),
                        None => Op::Nop,
                    },
                };
                std::future::ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => Ok(entry.into_value()),
            _ => Err(not_an_integer(key)),
        }
    }
}

#[derive(Default)]
struct PostTable {
    last_id: PostId,
    rows: BTreeMap<PostId, Post>,
}

/// In-memory post repository; ids start at 1 and are never reused
#[derive(Default)]
pub struct MemoryPostRepository {
    table: RwLock<PostTable>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn create(&self, post: NewPost) -> Result<Post, BackendError> {
        let mut table = self.table.write().await;
        table.last_id += 1;
        let now = Utc::now();
        let row = Post {
            id: table.last_id,
            title: post.title,
            content: post.content,
            author: post.author,
            view_count: 0,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>, BackendError> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn update(&self, id: PostId, changes: PostUpdate) -> Result<Option<Post>, BackendError> {
        let mut table = self.table.write().await;
        Ok(table.rows.get_mut(&id).map(|row| {
            changes.apply_to(row, Utc::now());
            row.clone()
        }))
    }

    async fn delete(&self, id: PostId) -> Result<bool, BackendError> {
        Ok(self.table.write().await.rows.remove(&id).is_some())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, BackendError> {
        let table = self.table.read().await;
        let mut rows: Vec<Post> = table.rows.values().cloned().collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows
            .into_iter()
            .skip(usize::try_from(offset.max(0)).unwrap_or(usize::MAX))
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .collect())
    }

    async fn set_view_count(&self, id: PostId, count: i64) -> Result<bool, BackendError> {
        let mut table = self.table.write().await;
        Ok(match table.rows.get_mut(&id) {
            Some(row) => {
                row.view_count = count;
                true
            }
            None => false,
        })
    }
}
