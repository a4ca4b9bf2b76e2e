//! Redis key naming for posts
//!
//! Content snapshots and view counters live in disjoint key spaces so they can
//! carry different expiry policies:
//!
//! - `{namespace}:{id}:content` (expires)
//! - `{namespace}:{id}:views` (never expires)

use std::borrow::Cow;

use crate::PostId;

const DEFAULT_NAMESPACE: &str = "post";

/// Key formatter with a configurable namespace prefix
#[derive(Debug, Clone)]
pub struct PostKeys {
    namespace: Cow<'static, str>,
}

impl Default for PostKeys {
    fn default() -> Self {
        Self {
            namespace: Cow::Borrowed(DEFAULT_NAMESPACE),
        }
    }
}

impl PostKeys {
    /// Accepts a literal or a namespace built at runtime, e.g. from config
    pub fn new(namespace: impl Into<Cow<'static, str>>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Key of the cached post snapshot
    pub fn content(&self, id: PostId) -> String {
        format!("{}:{}:content", self.namespace, id)
    }

    /// Key of the live view counter
    pub fn views(&self, id: PostId) -> String {
        format!("{}:{}:views", self.namespace, id)
    }
}

/// `post:{id}:content`
pub fn content_key(id: PostId) -> String {
    PostKeys::default().content(id)
}

/// `post:{id}:views`
pub fn views_key(id: PostId) -> String {
    PostKeys::default().views(id)
}
