//! postcache - Cache-aside post cache with live view counters
//!
//! This library mediates between two stores:
//! - A persistent post repository (Postgres), authoritative for post content
//! - A fast key-value store (Redis), used as a read-through cache for post
//!   snapshots and as the authoritative live view counter
//!
//! The cache supports:
//! - Cache-aside reads with the live view count overlaid on every read
//! - Invalidation after every durable update or delete
//! - Atomic view counting with eager sync-on-miss and periodic reconciliation
//! - Degrading to repository-only reads while the fast store is down

mod config;
mod coordinator;
mod error;
pub mod keys;
mod memory;
mod post;
mod reconciler;
mod repository;
mod service;
mod store;

pub use config::CacheConfig;
pub use coordinator::PostCacheCoordinator;
pub use error::{BackendError, CacheError, PostError};
pub use keys::{PostKeys, content_key, views_key};
pub use memory::{MemoryPostRepository, MemoryStore};
pub use post::{NewPost, Post, PostId, PostUpdate};
pub use reconciler::ViewCountReconciler;
pub use repository::{PgPostRepository, PostRepository};
pub use service::PostService;
pub use store::{FastStore, RedisStore};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
