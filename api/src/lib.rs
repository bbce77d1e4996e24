pub mod achievements;
pub mod auth;
pub mod cache;
pub mod comment_tree;
pub mod comments;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod feed;
pub mod likes;
pub mod posts;
pub mod store;
pub mod telemetry;
pub mod users;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::PostCache;
use crate::config::Config;
use crate::error::ApiResult;
use crate::feed::FeedClient;
use crate::store::Store;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub posts: Arc<PostCache>,
    pub feed: Arc<FeedClient>,
    pub jwt_secret: String,
    pub per_page: i64,
    pub cors_origin: String,
}

impl AppState {
    /// Opens the database, runs migrations and wires up the caches.
    pub fn from_config(config: &Config) -> ApiResult<Self> {
        let pool = db::open_pool(&config.database_url)?;
        db::run_migrations(&pool)?;

        Ok(Self {
            store: Store::new(pool),
            posts: Arc::new(PostCache::new()),
            feed: Arc::new(FeedClient::new(
                config.feed_url.clone(),
                config.feed_cache_ttl,
            )?),
            jwt_secret: config.jwt_secret.clone(),
            per_page: config.posts_per_page,
            cors_origin: config.cors_origin.clone(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = match state.cors_origin.parse::<axum::http::HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin),
        Err(_) => {
            tracing::warn!(origin = %state.cors_origin, "invalid CORS origin, allowing none");
            CorsLayer::new().allow_origin(AllowOrigin::list([]))
        }
    }
    .allow_methods(AllowMethods::any())
    .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Auth
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        // Users
        .route("/api/users/me", axum::routing::put(users::update_me))
        .route("/api/users/{id}", get(users::get_profile))
        // Posts
        .route(
            "/api/posts",
            get(posts::list_posts).post(posts::create_post),
        )
        .route(
            "/api/posts/{id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/api/posts/{id}/views", post(posts::record_view))
        .route(
            "/api/posts/{id}/likes",
            get(likes::get_likes).post(likes::toggle_like),
        )
        // Comments
        .route(
            "/api/posts/{id}/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route("/api/comments/{id}", delete(comments::delete_comment))
        // Leaderboard
        .route("/api/achievements", get(achievements::get_achievements))
        // External feed
        .route("/api/feed", get(feed::get_feed))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
