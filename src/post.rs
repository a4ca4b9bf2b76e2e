//! Post records shared by the repository and the cache
//!
//! `Post` doubles as the cached snapshot schema: the Fast Store holds its JSON
//! encoding, and unknown fields are rejected so a shape mismatch shows up as a
//! deserialization failure instead of a silently partial value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned post identity
pub type PostId = i64;

/// A blog post as held by the persistent store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(deny_unknown_fields)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub author: String,
    /// Last synced copy of the live view counter
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Replace the embedded view count with a fresher value.
    pub fn with_view_count(mut self, views: u64) -> Self {
        self.view_count = i64::try_from(views).unwrap_or(i64::MAX);
        self
    }
}

/// Fields required to create a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author: String,
}

impl NewPost {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            author: author.into(),
        }
    }
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl PostUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Apply the present fields to `post` and stamp `updated_at`.
    pub fn apply_to(self, post: &mut Post, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(content) = self.content {
            post.content = content;
        }
        if let Some(author) = self.author {
            post.author = author;
        }
        post.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Post {
        let now = Utc::now();
        Post {
            id: 7,
            title: "Hello".to_owned(),
            content: "World".to_owned(),
            author: "Ada".to_owned(),
            view_count: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_snapshot_rejects_unknown_fields() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("extra".to_owned(), serde_json::json!(1));
        assert!(serde_json::from_value::<Post>(value).is_err());
    }

    #[test]
    fn test_snapshot_rejects_missing_fields() {
        let json = r#"{"id": 1, "title": "only a title"}"#;
        assert!(serde_json::from_str::<Post>(json).is_err());
    }

    #[test]
    fn test_update_applies_present_fields_only() {
        let mut post = sample();
        let later = post.updated_at + chrono::Duration::seconds(5);

        PostUpdate::title("Renamed").apply_to(&mut post, later);

        assert_eq!(post.title, "Renamed");
        assert_eq!(post.content, "World");
        assert_eq!(post.author, "Ada");
        assert_eq!(post.updated_at, later);
    }

    #[test]
    fn test_with_view_count_overlays() {
        assert_eq!(sample().with_view_count(42).view_count, 42);
        assert_eq!(sample().with_view_count(u64::MAX).view_count, i64::MAX);
    }
}
