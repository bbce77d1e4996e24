use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;

use crate::{error::ApiResult, DbPool};

/// Opens (or creates) the SQLite database at `path` with foreign keys on.
pub fn open_pool(path: &str) -> ApiResult<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::new(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> ApiResult<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT UNIQUE NOT NULL,
            email         TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            avatar_url    TEXT NOT NULL DEFAULT '',
            bio           TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            tags        TEXT NOT NULL DEFAULT '[]',
            status      TEXT NOT NULL DEFAULT 'draft',
            views       INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_status_created ON posts(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);

        -- parent_id is not a foreign key; replies of a deleted comment
        -- keep their dangling parent and render as roots.
        CREATE TABLE IF NOT EXISTS comments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            parent_id   INTEGER,
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

        CREATE TABLE IF NOT EXISTS likes (
            user_id     INTEGER NOT NULL REFERENCES users(id),
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, post_id)
        );
        CREATE INDEX IF NOT EXISTS idx_likes_post ON likes(post_id);

        CREATE TABLE IF NOT EXISTS post_views (
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            viewer_hash TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(post_id, viewer_hash)
        );
        ",
    )?;

    Ok(())
}
