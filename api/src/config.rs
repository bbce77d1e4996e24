use std::env;
use std::time::Duration;

use thiserror::Error;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub posts_per_page: i64,
    /// Tabular feed of externally authored posts; `None` disables the feed.
    pub feed_url: Option<String>,
    pub feed_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        let posts_per_page = parse_int("POSTS_PER_PAGE", 10)?;
        if posts_per_page < 1 {
            return Err(ConfigError::InvalidValue {
                name: "POSTS_PER_PAGE".into(),
                message: "must be at least 1".into(),
            });
        }

        let feed_url = env::var("FEED_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty());
        let feed_cache_secs = parse_int("FEED_CACHE_SECS", 600)?;
        let feed_cache_ttl =
            Duration::from_secs(u64::try_from(feed_cache_secs).map_err(|_| {
                ConfigError::InvalidValue {
                    name: "FEED_CACHE_SECS".into(),
                    message: "must not be negative".into(),
                }
            })?);

        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "essayist.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret,
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:1313".to_string()),
            posts_per_page,
            feed_url,
            feed_cache_ttl,
        })
    }

    /// Configuration for tests and local tooling: no feed, fixed secret.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            cors_origin: "http://localhost:1313".to_string(),
            posts_per_page: 10,
            feed_url: None,
            feed_cache_ttl: Duration::from_secs(600),
        }
    }
}

fn parse_int(name: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        Err(_) => Ok(default),
    }
}
