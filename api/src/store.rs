//! Typed access to the posts, comments and users collections.
//!
//! Every call borrows a pooled connection on the blocking pool. Rows pass
//! through the decoders at the bottom of this file: a point read that fails
//! to decode is an error, a list read skips the bad row and logs it.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use essayist_shared::{Comment, LikeResponse, Post, PostStatus, PostSummary, User};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::comment_tree::AuthorLookup;
use crate::content;
use crate::error::{ApiError, ApiResult};
use crate::DbPool;

const USER_COLUMNS: &str = "u.id, u.name, u.avatar_url, u.bio, u.created_at";

const POST_COLUMNS: &str = "p.id, p.title, p.author_id, p.content, p.created_at, p.updated_at,
     p.views, (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id), p.tags, p.status";

const COMMENT_COLUMNS: &str = "c.id, c.post_id, c.user_id, c.body, c.parent_id, c.created_at";

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub bio: String,
}

pub struct NewPost {
    pub title: String,
    pub content: Value,
    pub tags: Vec<String>,
    pub status: PostStatus,
}

/// Already-sanitized partial update; `None` keeps the stored value.
#[derive(Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub status: Option<PostStatus>,
}

#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> ApiResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    // ── Users ──

    pub async fn create_user(&self, new: NewUser) -> ApiResult<User> {
        self.run(move |conn| {
            let name_taken: Option<i64> = conn
                .query_row("SELECT id FROM users WHERE name = ?1", [&new.name], |row| {
                    row.get(0)
                })
                .optional()?;
            if name_taken.is_some() {
                return Err(ApiError::Conflict("name already taken".into()));
            }
            let email_taken: Option<i64> = conn
                .query_row("SELECT id FROM users WHERE email = ?1", [&new.email], |row| {
                    row.get(0)
                })
                .optional()?;
            if email_taken.is_some() {
                return Err(ApiError::Conflict("email already registered".into()));
            }

            let inserted = conn
                .execute(
                    "INSERT INTO users (name, email, password_hash, avatar_url, bio, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        new.name,
                        new.email,
                        new.password_hash,
                        new.avatar_url,
                        new.bio,
                        format_ts(Utc::now())
                    ],
                )
                .map_err(ApiError::from);
            match inserted {
                Err(err) if err.is_constraint_violation() => {
                    return Err(ApiError::Conflict("name or email already registered".into()))
                }
                other => other?,
            };

            let id = conn.last_insert_rowid();
            query_user(conn, id)?.ok_or(ApiError::NotFound)
        })
        .await
    }

    /// Returns the user and their password hash.
    pub async fn find_login(&self, email: String) -> ApiResult<Option<(User, String)>> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS}, u.password_hash FROM users u WHERE u.email = ?1"),
                [&email],
                |row| Ok((user_from_row(row, 0)?, row.get::<_, String>(5)?)),
            )
            .optional()
            .map_err(decode_failure)
        })
        .await
    }

    pub async fn get_user(&self, id: i64) -> ApiResult<Option<User>> {
        self.run(move |conn| query_user(conn, id)).await
    }

    pub async fn list_users(&self) -> ApiResult<Vec<User>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.id"))?;
            let rows = stmt.query_map([], |row| user_from_row(row, 0))?;
            Ok(keep_decoded(rows, "user"))
        })
        .await
    }

    pub async fn update_profile(
        &self,
        id: i64,
        avatar_url: Option<String>,
        bio: Option<String>,
    ) -> ApiResult<User> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE users SET avatar_url = COALESCE(?2, avatar_url), bio = COALESCE(?3, bio)
                 WHERE id = ?1",
                params![id, avatar_url, bio],
            )?;
            query_user(conn, id)?.ok_or(ApiError::NotFound)
        })
        .await
    }

    // ── Posts ──

    pub async fn create_post(&self, author_id: i64, new: NewPost) -> ApiResult<Post> {
        self.run(move |conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "INSERT INTO posts (author_id, title, content, tags, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    author_id,
                    new.title,
                    new.content.to_string(),
                    encode_tags(&new.tags),
                    new.status.as_str(),
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_post(conn, id)?.ok_or(ApiError::NotFound)
        })
        .await
    }

    pub async fn get_post(&self, id: i64) -> ApiResult<Option<Post>> {
        self.run(move |conn| query_post(conn, id)).await
    }

    pub async fn update_post(&self, id: i64, changes: PostChanges) -> ApiResult<Post> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let current = query_post(&tx, id)?.ok_or(ApiError::NotFound)?;

            let title = changes.title.unwrap_or(current.title);
            let content = changes.content.unwrap_or(current.content);
            let tags = changes.tags.unwrap_or(current.tags);
            let status = changes.status.unwrap_or(current.status);

            tx.execute(
                "UPDATE posts SET title = ?2, content = ?3, tags = ?4, status = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    title,
                    content.to_string(),
                    encode_tags(&tags),
                    status.as_str(),
                    format_ts(Utc::now())
                ],
            )?;
            let updated = query_post(&tx, id)?.ok_or(ApiError::NotFound)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    /// Deletes the post with its comments, likes and view records.
    pub async fn delete_post(&self, id: i64) -> ApiResult<bool> {
        self.run(move |conn| {
            let affected = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
        .await
    }

    /// Published posts, newest first.
    pub async fn list_published(&self) -> ApiResult<Vec<PostSummary>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS}, u.name
                 FROM posts p
                 LEFT JOIN users u ON u.id = p.author_id
                 WHERE p.status = 'published'
                 ORDER BY p.created_at DESC, p.id DESC"
            ))?;
            let rows = stmt.query_map([], summary_from_row)?;
            Ok(keep_decoded(rows, "post"))
        })
        .await
    }

    /// Counts the view once per `viewer_hash`. Returns the current total and
    /// whether this call incremented it.
    pub async fn record_view(&self, post_id: i64, viewer_hash: String) -> ApiResult<(i64, bool)> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO post_views (post_id, viewer_hash, created_at)
                 VALUES (?1, ?2, ?3)",
                params![post_id, viewer_hash, format_ts(Utc::now())],
            )?;
            if inserted > 0 {
                tx.execute("UPDATE posts SET views = views + 1 WHERE id = ?1", [post_id])?;
            }
            let views: i64 = tx
                .query_row("SELECT views FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })
                .optional()?
                .ok_or(ApiError::NotFound)?;
            tx.commit()?;
            Ok((views, inserted > 0))
        })
        .await
    }

    // ── Likes ──

    pub async fn like_state(&self, post_id: i64, user_id: Option<i64>) -> ApiResult<LikeResponse> {
        self.run(move |conn| query_like_state(conn, post_id, user_id))
            .await
    }

    /// Likes the post, or removes the like if the user already liked it.
    pub async fn toggle_like(&self, post_id: i64, user_id: i64) -> ApiResult<LikeResponse> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
                params![user_id, post_id],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
                    params![user_id, post_id, format_ts(Utc::now())],
                )?;
            }
            let state = query_like_state(&tx, post_id, Some(user_id))?;
            tx.commit()?;
            Ok(state)
        })
        .await
    }

    // ── Comments ──

    pub async fn comments_for_post(&self, post_id: i64) -> ApiResult<Vec<Comment>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.post_id = ?1 ORDER BY c.id"
            ))?;
            let rows = stmt.query_map([post_id], comment_from_row)?;
            Ok(keep_decoded(rows, "comment"))
        })
        .await
    }

    pub async fn all_comments(&self) -> ApiResult<Vec<Comment>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COMMENT_COLUMNS} FROM comments c ORDER BY c.id"))?;
            let rows = stmt.query_map([], comment_from_row)?;
            Ok(keep_decoded(rows, "comment"))
        })
        .await
    }

    pub async fn get_comment(&self, id: i64) -> ApiResult<Option<Comment>> {
        self.run(move |conn| query_comment(conn, id)).await
    }

    pub async fn create_comment(
        &self,
        post_id: i64,
        user_id: i64,
        body: String,
        parent_id: Option<i64>,
    ) -> ApiResult<Comment> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO comments (post_id, user_id, parent_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![post_id, user_id, parent_id, body, format_ts(Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            query_comment(conn, id)?.ok_or(ApiError::NotFound)
        })
        .await
    }

    pub async fn delete_comment(&self, id: i64) -> ApiResult<bool> {
        self.run(move |conn| {
            let affected = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
        .await
    }
}

impl AuthorLookup for Store {
    fn find_user(&self, id: i64) -> impl Future<Output = ApiResult<Option<User>>> + Send {
        self.get_user(id)
    }
}

// ── Queries shared between operations ──

fn query_user(conn: &Connection, id: i64) -> ApiResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
        [id],
        |row| user_from_row(row, 0),
    )
    .optional()
    .map_err(decode_failure)
}

fn query_post(conn: &Connection, id: i64) -> ApiResult<Option<Post>> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?1"),
        [id],
        post_from_row,
    )
    .optional()
    .map_err(decode_failure)
}

fn query_comment(conn: &Connection, id: i64) -> ApiResult<Option<Comment>> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?1"),
        [id],
        comment_from_row,
    )
    .optional()
    .map_err(decode_failure)
}

fn query_like_state(
    conn: &Connection,
    post_id: i64,
    user_id: Option<i64>,
) -> ApiResult<LikeResponse> {
    let like_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
        [post_id],
        |row| row.get(0),
    )?;
    let liked = match user_id {
        Some(uid) => conn
            .query_row(
                "SELECT 1 FROM likes WHERE user_id = ?1 AND post_id = ?2",
                params![uid, post_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some(),
        None => false,
    };
    Ok(LikeResponse { like_count, liked })
}

// ── Decoders ──

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn decode_failure(err: rusqlite::Error) -> ApiError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..) => ApiError::Decode(err.to_string()),
        other => ApiError::Sqlite(other),
    }
}

fn keep_decoded<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    kind: &'static str,
) -> Vec<T> {
    rows.filter_map(|row| match row {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(kind, error = %err, "skipping undecodable row");
            None
        }
    })
    .collect()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| conversion_error(idx, err))
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn user_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        avatar_url: row.get(offset + 2)?,
        bio: row.get(offset + 3)?,
        created_at: timestamp(row, offset + 4)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let raw_content: String = row.get(3)?;
    let content: Value =
        serde_json::from_str(&raw_content).map_err(|err| conversion_error(3, err))?;
    let raw_tags: String = row.get(8)?;
    let tags: Vec<String> =
        serde_json::from_str(&raw_tags).map_err(|err| conversion_error(8, err))?;
    let raw_status: String = row.get(9)?;
    let status: PostStatus = raw_status.parse().map_err(|err| conversion_error(9, err))?;
    let views: i64 = row.get(6)?;
    if views < 0 {
        return Err(conversion_error(6, format!("negative view count {views}")));
    }

    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        author_id: row.get(2)?,
        read_time_minutes: content::read_time_minutes(&content),
        content,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
        views,
        like_count: row.get(7)?,
        tags,
        status,
    })
}

/// Expects `POST_COLUMNS` followed by the author's name.
fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PostSummary> {
    let post = post_from_row(row)?;
    Ok(PostSummary {
        excerpt: content::excerpt(&post.content),
        author_name: row.get(10)?,
        id: post.id,
        title: post.title,
        author_id: post.author_id,
        created_at: post.created_at,
        views: post.views,
        like_count: post.like_count,
        tags: post.tags,
        read_time_minutes: post.read_time_minutes,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        body: row.get(3)?,
        parent_id: row.get(4)?,
        created_at: timestamp(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_store() -> (Store, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("store.db");
        let pool = db::open_pool(path.to_str().expect("utf-8 path")).expect("pool");
        db::run_migrations(&pool).expect("migrations");
        (Store::new(pool), dir)
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.into(),
            email: format!("{name}@example.com"),
            password_hash: "hash".into(),
            avatar_url: String::new(),
            bio: String::new(),
        }
    }

    fn essay(title: &str, status: PostStatus) -> NewPost {
        NewPost {
            title: title.into(),
            content: json!("a short essay"),
            tags: vec!["rust".into()],
            status,
        }
    }

    #[tokio::test]
    async fn duplicate_names_and_emails_conflict() {
        let (store, _dir) = setup_store();
        store.create_user(new_user("ada")).await.expect("first");

        let same_name = store.create_user(new_user("ada")).await;
        assert!(matches!(same_name, Err(ApiError::Conflict(_))));

        let mut same_email = new_user("grace");
        same_email.email = "ada@example.com".into();
        let result = store.create_user(same_email).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn listing_excludes_drafts() {
        let (store, _dir) = setup_store();
        let ada = store.create_user(new_user("ada")).await.expect("user");
        store
            .create_post(ada.id, essay("public", PostStatus::Published))
            .await
            .expect("published");
        store
            .create_post(ada.id, essay("hidden", PostStatus::Draft))
            .await
            .expect("draft");

        let listed = store.list_published().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "public");
        assert_eq!(listed[0].author_name.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn views_are_counted_once_per_viewer() {
        let (store, _dir) = setup_store();
        let ada = store.create_user(new_user("ada")).await.expect("user");
        let post = store
            .create_post(ada.id, essay("counted", PostStatus::Published))
            .await
            .expect("post");

        assert_eq!(
            store.record_view(post.id, "viewer-a".into()).await.expect("view"),
            (1, true)
        );
        assert_eq!(
            store.record_view(post.id, "viewer-a".into()).await.expect("view"),
            (1, false)
        );
        assert_eq!(
            store.record_view(post.id, "viewer-b".into()).await.expect("view"),
            (2, true)
        );
    }

    #[tokio::test]
    async fn like_toggles_on_and_off() {
        let (store, _dir) = setup_store();
        let ada = store.create_user(new_user("ada")).await.expect("user");
        let post = store
            .create_post(ada.id, essay("liked", PostStatus::Published))
            .await
            .expect("post");

        let on = store.toggle_like(post.id, ada.id).await.expect("like");
        assert_eq!((on.like_count, on.liked), (1, true));
        let off = store.toggle_like(post.id, ada.id).await.expect("unlike");
        assert_eq!((off.like_count, off.liked), (0, false));
    }

    #[tokio::test]
    async fn corrupt_status_is_rejected_on_point_read() {
        let (store, _dir) = setup_store();
        let ada = store.create_user(new_user("ada")).await.expect("user");
        let post = store
            .create_post(ada.id, essay("broken", PostStatus::Published))
            .await
            .expect("post");

        let pool = store.pool.clone();
        let id = post.id;
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().expect("conn");
            conn.execute("UPDATE posts SET status = 'archived' WHERE id = ?1", [id])
                .expect("corrupt");
        })
        .await
        .expect("join");

        assert!(matches!(store.get_post(id).await, Err(ApiError::Decode(_))));
        assert!(store.list_published().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn deleting_a_post_removes_its_comments() {
        let (store, _dir) = setup_store();
        let ada = store.create_user(new_user("ada")).await.expect("user");
        let post = store
            .create_post(ada.id, essay("short-lived", PostStatus::Published))
            .await
            .expect("post");
        store
            .create_comment(post.id, ada.id, "first".into(), None)
            .await
            .expect("comment");

        assert!(store.delete_post(post.id).await.expect("delete"));
        assert!(store.all_comments().await.expect("comments").is_empty());
    }
}
