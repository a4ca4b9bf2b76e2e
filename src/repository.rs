//! Persistent Store abstraction and its Postgres implementation

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{BackendError, NewPost, Post, PostId, PostUpdate};

/// Durable post storage, authoritative for title, content and author.
///
/// Implementations can use Postgres, MySQL, HTTP, or any other backend.
#[async_trait]
pub trait PostRepository: Send + Sync + 'static {
    /// Insert a post and return it with its assigned id
    async fn create(&self, post: NewPost) -> Result<Post, BackendError>;

    /// Fetch a post by id, or None if it doesn't exist
    async fn get(&self, id: PostId) -> Result<Option<Post>, BackendError>;

    /// Apply a partial update, or None if the post doesn't exist
    async fn update(&self, id: PostId, changes: PostUpdate) -> Result<Option<Post>, BackendError>;

    /// Delete a post, returning whether it existed
    async fn delete(&self, id: PostId) -> Result<bool, BackendError>;

    /// Page through posts, newest first
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, BackendError>;

    /// Overwrite the mirrored view count, returning whether the post exists
    async fn set_view_count(&self, id: PostId, count: i64) -> Result<bool, BackendError>;
}

const POST_COLUMNS: &str = "id, title, content, author, view_count, created_at, updated_at";

const CREATE_POSTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id BIGSERIAL PRIMARY KEY,
    title VARCHAR(255) NOT NULL,
    content TEXT NOT NULL,
    author VARCHAR(100) NOT NULL,
    view_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_TITLE_INDEX: &str = "CREATE INDEX IF NOT EXISTS ix_posts_title ON posts (title)";

/// Postgres-backed post repository
#[derive(Clone)]
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the `posts` table and its index if they don't exist
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_POSTS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_TITLE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    async fn create(&self, post: NewPost) -> Result<Post, BackendError> {
        let sql = format!(
            "INSERT INTO posts (title, content, author) VALUES ($1, $2, $3) RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query_as::<_, Post>(&sql)
            .bind(post.title)
            .bind(post.content)
            .bind(post.author)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>, BackendError> {
        let sql = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        let row = sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(&self, id: PostId, changes: PostUpdate) -> Result<Option<Post>, BackendError> {
        let sql = format!(
            "UPDATE posts SET \
                title = COALESCE($2, title), \
                content = COALESCE($3, content), \
                author = COALESCE($4, author), \
                updated_at = now() \
             WHERE id = $1 RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.content)
            .bind(changes.author)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete(&self, id: PostId) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, BackendError> {
        let sql = format!(
            "SELECT {} FROM posts ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2",
            POST_COLUMNS
        );
        let rows = sqlx::query_as::<_, Post>(&sql)
            .bind(offset.max(0))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn set_view_count(&self, id: PostId, count: i64) -> Result<bool, BackendError> {
        // view_count is a mirror; leave updated_at alone
        let result = sqlx::query("UPDATE posts SET view_count = $2 WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
