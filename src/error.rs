//! Cache and post error types

use redis::RedisError;

use crate::PostId;

/// Boxed error returned by pluggable backends
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Fast Store errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Fast store unavailable: {0}")]
    Unavailable(BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        CacheError::Unavailable(Box::new(err))
    }
}

/// Errors surfaced by the read and write paths
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("Post {0} not found")]
    NotFound(PostId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] BackendError),

    /// Only returned by maintenance operations such as view count syncing
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}
