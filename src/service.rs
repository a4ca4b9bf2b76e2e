//! Read and write paths over the repository and the post cache
//!
//! Writes always reach the repository first; the cache is only touched after
//! the durable write succeeded. Reads go cache-first and fall back to the
//! repository. Fast Store failures never fail a request: the request is served
//! from the repository with view counting skipped.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    FastStore, NewPost, Post, PostCacheCoordinator, PostError, PostId, PostRepository,
    PostUpdate,
};

/// Post operations composed from a repository and a cache coordinator
pub struct PostService<R: PostRepository, S: FastStore> {
    repository: Arc<R>,
    cache: PostCacheCoordinator<S>,
}

impl<R: PostRepository, S: FastStore> Clone for PostService<R, S> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            cache: self.cache.clone(),
        }
    }
}

impl<R: PostRepository, S: FastStore> PostService<R, S> {
    pub fn new(repository: R, cache: PostCacheCoordinator<S>) -> Self {
        Self {
            repository: Arc::new(repository),
            cache,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn cache(&self) -> &PostCacheCoordinator<S> {
        &self.cache
    }

    /// Read a post and count the view.
    ///
    /// The returned `view_count` is the live counter, not the value embedded
    /// in the snapshot or the column.
    pub async fn read(&self, id: PostId) -> Result<Post, PostError> {
        let mut cache_up = true;

        match self.cache.fetch(id).await {
            Ok(Some(snapshot)) => match self.cache.increment_views(id).await {
                Ok(views) => return Ok(snapshot.with_view_count(views)),
                Err(e) => {
                    warn!(
                        "View increment failed for post {} ({}). Serving from repository.",
                        id, e
                    );
                    cache_up = false;
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Cache fetch failed for post {} ({}). Serving from repository.",
                    id, e
                );
                cache_up = false;
            }
        }

        let post = self
            .repository
            .get(id)
            .await
            .inspect_err(|e| error!("Repository read failed for post {}: {}", id, e))?
            .ok_or(PostError::NotFound(id))?;

        if !cache_up {
            return Ok(post);
        }

        let views = match self.cache.increment_views(id).await {
            Ok(views) => views,
            Err(e) => {
                warn!(
                    "View increment failed for post {} ({}). Serving from repository.",
                    id, e
                );
                return Ok(post);
            }
        };
        let post = post.with_view_count(views);

        // Eager sync-on-miss
        if !self
            .repository
            .set_view_count(id, post.view_count)
            .await
            .inspect_err(|e| error!("Repository view sync failed for post {}: {}", id, e))?
        {
            debug!("Post {} disappeared before its view count was synced", id);
        }

        if let Err(e) = self.cache.store(id, &post).await {
            warn!("Failed to cache post {}: {}. Continuing.", id, e);
        }

        Ok(post)
    }

    /// Create a post and warm its cache entry
    pub async fn create(&self, new_post: NewPost) -> Result<Post, PostError> {
        let post = self
            .repository
            .create(new_post)
            .await
            .inspect_err(|e| error!("Repository create failed: {}", e))?;

        if let Err(e) = self.cache.store(post.id, &post).await {
            warn!("Failed to cache new post {}: {}. Continuing.", post.id, e);
        }

        Ok(post)
    }

    /// Update a post and drop its cached snapshot
    pub async fn update(&self, id: PostId, changes: PostUpdate) -> Result<Post, PostError> {
        let post = self
            .repository
            .update(id, changes)
            .await
            .inspect_err(|e| error!("Repository update failed for post {}: {}", id, e))?
            .ok_or(PostError::NotFound(id))?;

        if let Err(e) = self.cache.invalidate(id).await {
            warn!("Failed to invalidate post {}: {}. Purge deferred.", id, e);
        }

        Ok(post)
    }

    /// Delete a post along with its snapshot and view counter
    pub async fn delete(&self, id: PostId) -> Result<(), PostError> {
        let existed = self
            .repository
            .delete(id)
            .await
            .inspect_err(|e| error!("Repository delete failed for post {}: {}", id, e))?;
        if !existed {
            return Err(PostError::NotFound(id));
        }

        if let Err(e) = self.cache.invalidate(id).await {
            warn!("Failed to invalidate post {}: {}. Purge deferred.", id, e);
        }
        if let Err(e) = self.cache.forget_views(id).await {
            warn!("Failed to drop view counter of post {}: {}. Purge deferred.", id, e);
        }

        Ok(())
    }

    /// Page through posts, newest first. Listings are not cached.
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, PostError> {
        Ok(self
            .repository
            .list(offset, limit)
            .await
            .inspect_err(|e| error!("Repository list failed: {}", e))?)
    }

    /// Live view count without counting a view.
    ///
    /// Falls back to the repository's mirrored column when the Fast Store is
    /// down; only that fallback checks the post exists.
    pub async fn views(&self, id: PostId) -> Result<u64, PostError> {
        match self.cache.current_views(id).await {
            Ok(views) => Ok(views),
            Err(e) => {
                warn!(
                    "View counter read failed for post {} ({}). Using repository.",
                    id, e
                );
                let post = self
                    .repository
                    .get(id)
                    .await?
                    .ok_or(PostError::NotFound(id))?;
                Ok(u64::try_from(post.view_count).unwrap_or(0))
            }
        }
    }

    /// Copy the live counter into the repository column.
    ///
    /// Returns the synced value, or `None` when the post has no counter or no
    /// longer exists. Unlike the request paths this surfaces cache errors.
    pub async fn sync_view_count(&self, id: PostId) -> Result<Option<u64>, PostError> {
        let views = self.cache.current_views(id).await?;
        if views == 0 {
            return Ok(None);
        }

        let count = i64::try_from(views).unwrap_or(i64::MAX);
        if self.repository.set_view_count(id, count).await? {
            Ok(Some(views))
        } else {
            Ok(None)
        }
    }
}
