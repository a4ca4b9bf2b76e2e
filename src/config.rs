//! Cache configuration

use std::{str::FromStr, time::Duration};

use tracing::warn;

/// Configuration for the post cache and the view count reconciler
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cached post snapshots
    pub content_ttl: Duration,
    /// How often the reconciler mirrors counters into the repository
    pub reconcile_interval: Duration,
    /// Posts fetched per repository page during reconciliation
    pub reconcile_batch_size: i64,
    /// Concurrent counter syncs per page
    pub reconcile_concurrency: usize,
    /// Maximum number of keys held by the in-memory store
    pub memory_max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_ttl: Duration::from_secs(3600), // 1 hour
            reconcile_interval: Duration::from_secs(300), // 5 minutes
            reconcile_batch_size: 100,
            reconcile_concurrency: 8,
            memory_max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Build a config from `POSTCACHE_*` environment variables, falling back
    /// to defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            content_ttl: parse_var(&lookup, "POSTCACHE_CONTENT_TTL_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.content_ttl),
            reconcile_interval: parse_var(&lookup, "POSTCACHE_RECONCILE_INTERVAL_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            reconcile_batch_size: parse_var(&lookup, "POSTCACHE_RECONCILE_BATCH_SIZE")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.reconcile_batch_size),
            ..defaults
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}, using default", name, raw);
            None
        }
    }
}
