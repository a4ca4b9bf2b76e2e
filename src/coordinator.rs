//! Post cache coordinator
//!
//! Owns the Fast Store side of the post cache:
//! - Cached post snapshots under `post:{id}:content`, expiring after the
//!   configured TTL
//! - Live view counters under `post:{id}:views`, which never expire and are
//!   authoritative over the persistent `view_count` column
//!
//! The coordinator never talks to the persistent store. Composing these
//! primitives with a repository is `PostService`'s job.
//!
//! Deletes that fail while the Fast Store is unreachable are remembered and
//! replayed before the next `fetch` of that post, so a stale snapshot is never
//! served once the store is back.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{CacheConfig, CacheError, FastStore, Post, PostId, PostKeys};

/// Keys of one post still waiting to be deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingPurge {
    content: bool,
    views: bool,
}

/// Cache-aside primitives and view counter maintenance for posts
pub struct PostCacheCoordinator<S: FastStore> {
    store: Arc<S>,
    keys: PostKeys,
    config: CacheConfig,
    pending: Arc<Mutex<HashMap<PostId, PendingPurge>>>,
}

impl<S: FastStore> Clone for PostCacheCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
            config: self.config.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<S: FastStore> PostCacheCoordinator<S> {
    /// Create a coordinator using the default `post:` key namespace
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self::with_keys(store, config, PostKeys::default())
    }

    pub fn with_keys(store: S, config: CacheConfig, keys: PostKeys) -> Self {
        Self {
            store: Arc::new(store),
            keys,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Write the post snapshot, replacing any existing one and restarting its TTL
    pub async fn store(&self, id: PostId, post: &Post) -> Result<(), CacheError> {
        if post.id != id {
            warn!("Refusing to cache post {} under id {}", post.id, id);
            return Ok(());
        }
        let key = self.keys.content(id);
        let json = serde_json::to_vec(post)?;
        self.store.set(&key, json, self.config.content_ttl).await?;
        debug!("Cached post {} under {}", id, key);
        Ok(())
    }

    /// Read the post snapshot.
    ///
    /// Returns `Ok(None)` on a miss. A value that no longer deserializes, or
    /// that belongs to another post, is also reported as a miss and removed
    /// best-effort. Deferred deletes for `id` are replayed first; if that
    /// still fails the store error is returned.
    pub async fn fetch(&self, id: PostId) -> Result<Option<Post>, CacheError> {
        self.replay_pending(id).await?;

        let key = self.keys.content(id);
        let Some(raw) = self.store.get(&key).await? else {
            debug!("Cache miss for post {}", id);
            return Ok(None);
        };

        let reason = match serde_json::from_slice::<Post>(&raw) {
            Ok(post) if post.id == id => {
                debug!("Cache hit for post {}", id);
                return Ok(Some(post));
            }
            Ok(post) => format!("snapshot belongs to post {}", post.id),
            Err(e) => e.to_string(),
        };

        warn!(
            "Discarding cached post {} ({}): {}. Treating as a miss.",
            id, key, reason
        );
        if let Err(del_err) = self.store.delete(&key).await {
            warn!("Failed to delete corrupt entry {}: {}", key, del_err);
        }
        Ok(None)
    }

    /// Drop the post snapshot; a no-op when nothing is cached.
    ///
    /// On failure the delete is deferred and replayed by the next `fetch` or
    /// `retry_pending`.
    pub async fn invalidate(&self, id: PostId) -> Result<(), CacheError> {
        debug!("Invalidating cached post {}", id);
        if let Err(e) = self.store.delete(&self.keys.content(id)).await {
            self.defer(id, |purge| purge.content = true).await;
            return Err(e);
        }
        Ok(())
    }

    /// Atomically bump the view counter and return the new value (1 on first view)
    pub async fn increment_views(&self, id: PostId) -> Result<u64, CacheError> {
        let views = self.store.increment(&self.keys.views(id)).await?;
        match u64::try_from(views) {
            Ok(views) => Ok(views),
            Err(_) => {
                warn!(
                    "View counter {} went negative ({}), reading as 0",
                    self.keys.views(id),
                    views
                );
                Ok(0)
            }
        }
    }

    /// Current view counter, 0 when the post has never been viewed
    pub async fn current_views(&self, id: PostId) -> Result<u64, CacheError> {
        self.replay_pending(id).await?;

        let key = self.keys.views(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(0);
        };

        let parsed = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());
        match parsed {
            Some(views) => Ok(views),
            None => {
                warn!("View counter {} holds a non-counter value, reading as 0", key);
                Ok(0)
            }
        }
    }

    /// Remove the view counter; only used when the post itself is deleted.
    ///
    /// Deferred like `invalidate` when the store is unreachable.
    pub async fn forget_views(&self, id: PostId) -> Result<(), CacheError> {
        if let Err(e) = self.store.delete(&self.keys.views(id)).await {
            self.defer(id, |purge| purge.views = true).await;
            return Err(e);
        }
        Ok(())
    }

    /// Number of posts with deletes still waiting to be replayed
    pub async fn pending_purges(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Replay every deferred delete; returns how many posts were cleaned up.
    ///
    /// Stops at the first failure, leaving the rest queued.
    pub async fn retry_pending(&self) -> Result<usize, CacheError> {
        let ids: Vec<PostId> = self.pending.lock().await.keys().copied().collect();
        for id in &ids {
            self.replay_pending(*id).await?;
        }
        Ok(ids.len())
    }

    async fn defer(&self, id: PostId, mark: impl FnOnce(&mut PendingPurge)) {
        let mut pending = self.pending.lock().await;
        mark(pending.entry(id).or_default());
        warn!("Deferred cache purge for post {}", id);
    }

    async fn replay_pending(&self, id: PostId) -> Result<(), CacheError> {
        let Some(purge) = self.pending.lock().await.get(&id).copied() else {
            return Ok(());
        };

        if purge.content {
            self.store.delete(&self.keys.content(id)).await?;
        }
        if purge.views {
            self.store.delete(&self.keys.views(id)).await?;
        }

        // A failure recorded meanwhile stays queued
        let mut pending = self.pending.lock().await;
        if pending.get(&id) == Some(&purge) {
            pending.remove(&id);
        }
        debug!("Replayed deferred cache purge for post {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, content_key, memory::testing::FlakyStore};
    use chrono::Utc;
    use futures::future::join_all;
    use std::time::Duration;

    fn coordinator() -> PostCacheCoordinator<MemoryStore> {
        PostCacheCoordinator::new(MemoryStore::default(), CacheConfig::default())
    }

    fn post(id: PostId, title: &str) -> Post {
        let now = Utc::now();
        Post {
            id,
            title: title.to_owned(),
            content: "Test content".to_owned(),
            author: "Test Author".to_owned(),
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_never_stored_id() {
        let cache = coordinator();
        assert_eq!(cache.fetch(404).await.unwrap(), None);
        assert_eq!(cache.current_views(404).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let cache = coordinator();
        let p = post(1, "Test Post");
        cache.store(1, &p).await.unwrap();
        assert_eq!(cache.fetch(1).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let cache = coordinator();
        cache.store(1, &post(1, "old")).await.unwrap();
        cache.store(1, &post(1, "new")).await.unwrap();
        assert_eq!(cache.fetch(1).await.unwrap().unwrap().title, "new");
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = coordinator();
        cache.store(2, &post(2, "Test")).await.unwrap();
        cache.invalidate(2).await.unwrap();
        assert_eq!(cache.fetch(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_never_cached_is_noop() {
        let cache = coordinator();
        cache.invalidate(77).await.unwrap();
        cache.invalidate(77).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_leaves_views() {
        let cache = coordinator();
        cache.store(3, &post(3, "Test")).await.unwrap();
        cache.increment_views(3).await.unwrap();
        cache.invalidate(3).await.unwrap();
        assert_eq!(cache.current_views(3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sequential_increments() {
        let cache = coordinator();
        for expected in 1..=10u64 {
            assert_eq!(cache.increment_views(3).await.unwrap(), expected);
        }
        assert_eq!(cache.current_views(3).await.unwrap(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        let cache = coordinator();
        let (callers, per_caller) = (16u64, 25u64);

        let tasks = (0..callers).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for _ in 0..per_caller {
                    cache.increment_views(9).await.unwrap();
                }
            })
        });
        for joined in join_all(tasks).await {
            joined.unwrap();
        }

        assert_eq!(cache.current_views(9).await.unwrap(), callers * per_caller);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_a_miss() {
        let store = MemoryStore::default();
        store
            .set("post:5:content", b"{not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = PostCacheCoordinator::new(store.clone(), CacheConfig::default());

        assert_eq!(cache.fetch(5).await.unwrap(), None);
        assert_eq!(store.get("post:5:content").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_shape_snapshot_is_a_miss() {
        let store = MemoryStore::default();
        store
            .set(
                "post:6:content",
                br#"{"id": 6, "title": "Test"}"#.to_vec(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let cache = PostCacheCoordinator::new(store, CacheConfig::default());
        assert_eq!(cache.fetch(6).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_counter_reads_as_zero() {
        let store = MemoryStore::default();
        store
            .set("post:8:views", b"-3".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = PostCacheCoordinator::new(store, CacheConfig::default());
        assert_eq!(cache.current_views(8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_expires_counter_survives() {
        let config = CacheConfig {
            content_ttl: Duration::from_millis(50),
            ..CacheConfig::default()
        };
        let cache = PostCacheCoordinator::new(MemoryStore::new(&config), config);
        cache.store(4, &post(4, "Ephemeral")).await.unwrap();
        cache.increment_views(4).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.fetch(4).await.unwrap(), None);
        assert_eq!(cache.current_views(4).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_for_another_post_is_a_miss() {
        let store = MemoryStore::default();
        let cache = PostCacheCoordinator::new(store.clone(), CacheConfig::default());

        cache.store(1, &post(2, "Misfiled")).await.unwrap();
        assert_eq!(cache.fetch(1).await.unwrap(), None);

        let json = serde_json::to_vec(&post(2, "Misfiled")).unwrap();
        store
            .set("post:1:content", json, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.fetch(1).await.unwrap(), None);
        assert_eq!(store.get("post:1:content").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_negative_counter_increment_reads_as_zero() {
        let store = MemoryStore::default();
        store
            .set("post:11:views", b"-5".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = PostCacheCoordinator::new(store, CacheConfig::default());
        assert_eq!(cache.increment_views(11).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forget_views() {
        let cache = coordinator();
        cache.increment_views(10).await.unwrap();
        cache.forget_views(10).await.unwrap();
        assert_eq!(cache.current_views(10).await.unwrap(), 0);
        assert_eq!(cache.increment_views(10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_invalidate_is_replayed_before_fetch() {
        let store = FlakyStore::default();
        let cache = PostCacheCoordinator::new(store.clone(), CacheConfig::default());
        cache.store(1, &post(1, "Old")).await.unwrap();
        cache.increment_views(1).await.unwrap();

        store.set_down(true);
        assert!(cache.invalidate(1).await.is_err());
        assert!(cache.forget_views(1).await.is_err());
        assert_eq!(cache.pending_purges().await, 1);
        assert!(cache.fetch(1).await.is_err());

        store.set_down(false);
        assert_eq!(cache.fetch(1).await.unwrap(), None);
        assert_eq!(cache.current_views(1).await.unwrap(), 0);
        assert_eq!(cache.pending_purges().await, 0);
    }

    #[tokio::test]
    async fn test_retry_pending_flushes_every_post() {
        let store = FlakyStore::default();
        let cache = PostCacheCoordinator::new(store.clone(), CacheConfig::default());
        for id in 1..=3 {
            cache.store(id, &post(id, "Cached")).await.unwrap();
        }

        store.set_down(true);
        for id in 1..=3 {
            assert!(cache.invalidate(id).await.is_err());
        }
        assert!(cache.retry_pending().await.is_err());
        assert_eq!(cache.pending_purges().await, 3);

        store.set_down(false);
        assert_eq!(cache.retry_pending().await.unwrap(), 3);
        assert_eq!(cache.pending_purges().await, 0);
        for id in 1..=3 {
            assert_eq!(store.get(&content_key(id)).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_custom_namespace_is_isolated() {
        let store = MemoryStore::default();
        let blog = PostCacheCoordinator::with_keys(
            store.clone(),
            CacheConfig::default(),
            PostKeys::new("blog"),
        );
        let other = PostCacheCoordinator::new(store, CacheConfig::default());

        blog.store(1, &post(1, "Blog")).await.unwrap();
        blog.increment_views(1).await.unwrap();

        assert_eq!(other.fetch(1).await.unwrap(), None);
        assert_eq!(other.current_views(1).await.unwrap(), 0);
    }
}
