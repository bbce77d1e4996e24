//! Read-only feed of externally authored posts, published as a spreadsheet.
//!
//! The upstream document uses the Sheets "values" shape: the first row holds
//! column headers and each following row is one post.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, Json};
use essayist_shared::FeedPost;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Delay before retrying after a failed refresh, capped by the ttl.
const FAILURE_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedFeed {
    posts: Arc<Vec<FeedPost>>,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct SheetValues {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct FeedClient {
    http: reqwest::Client,
    url: Option<String>,
    ttl: Duration,
    cache: RwLock<Option<CachedFeed>>,
}

impl FeedClient {
    pub fn new(url: Option<String>, ttl: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("essayist-api")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        Ok(Self {
            http,
            url,
            ttl,
            cache: RwLock::new(None),
        })
    }

    pub async fn posts(&self) -> ApiResult<Arc<Vec<FeedPost>>> {
        let Some(url) = self.url.as_deref() else {
            return Ok(Arc::new(Vec::new()));
        };

        // Check cache
        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache {
                if Instant::now() < cached.refresh_at {
                    return Ok(Arc::clone(&cached.posts));
                }
            }
        }

        match self.fetch(url).await {
            Ok(posts) => {
                let posts = Arc::new(posts);
                let mut cache = self.cache.write().await;
                *cache = Some(CachedFeed {
                    posts: Arc::clone(&posts),
                    refresh_at: Instant::now() + self.ttl,
                });
                Ok(posts)
            }
            Err(err) => {
                let mut cache = self.cache.write().await;
                match *cache {
                    Some(ref mut stale) => {
                        tracing::warn!(error = %err, "feed refresh failed, serving stale copy");
                        stale.refresh_at = Instant::now() + self.ttl.min(FAILURE_BACKOFF);
                        Ok(Arc::clone(&stale.posts))
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn fetch(&self, url: &str) -> ApiResult<Vec<FeedPost>> {
        let sheet: SheetValues = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| ApiError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let posts = parse_sheet(&sheet.values);
        tracing::info!(count = posts.len(), "external feed refreshed");
        Ok(posts)
    }
}

#[derive(Debug, Default)]
struct Columns {
    title: Option<usize>,
    author: Option<usize>,
    url: Option<usize>,
    published: Option<usize>,
    summary: Option<usize>,
}

impl Columns {
    fn from_header(header: &[serde_json::Value]) -> Self {
        let mut columns = Columns::default();
        for (idx, cell) in header.iter().enumerate() {
            let name = cell_text(cell).unwrap_or_default().to_lowercase();
            let slot = match name.as_str() {
                "title" => &mut columns.title,
                "author" => &mut columns.author,
                "url" | "link" => &mut columns.url,
                "published" | "date" => &mut columns.published,
                "summary" | "description" => &mut columns.summary,
                _ => continue,
            };
            slot.get_or_insert(idx);
        }
        columns
    }
}

/// Rows without a title or url are skipped.
pub fn parse_sheet(values: &[Vec<serde_json::Value>]) -> Vec<FeedPost> {
    let Some((header, rows)) = values.split_first() else {
        return Vec::new();
    };
    let columns = Columns::from_header(header);
    let (Some(title_col), Some(url_col)) = (columns.title, columns.url) else {
        tracing::warn!("feed header lacks a title or url column");
        return Vec::new();
    };

    let cell = |row: &[serde_json::Value], col: Option<usize>| {
        col.and_then(|idx| row.get(idx)).and_then(cell_text)
    };

    rows.iter()
        .enumerate()
        .filter_map(|(line, row)| {
            let title = cell(row, Some(title_col));
            let url = cell(row, Some(url_col));
            match (title, url) {
                (Some(title), Some(url)) => Some(FeedPost {
                    title,
                    url,
                    author: cell(row, columns.author),
                    published: cell(row, columns.published),
                    summary: cell(row, columns.summary),
                }),
                _ => {
                    tracing::debug!(row = line + 2, "skipping incomplete feed row");
                    None
                }
            }
        })
        .collect()
}

fn cell_text(cell: &serde_json::Value) -> Option<String> {
    let text = match cell {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// GET /api/feed
pub async fn get_feed(State(state): State<AppState>) -> ApiResult<Json<Vec<FeedPost>>> {
    let posts = state.feed.posts().await?;
    Ok(Json(posts.as_ref().clone()))
}
