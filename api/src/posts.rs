use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use essayist_shared::*;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::content;
use crate::error::{ApiError, ApiResult};
use crate::store::{NewPost, PostChanges};
use crate::{auth, AppState};

const MAX_TITLE_LEN: usize = 200;
const MAX_VIEWER_KEY_LEN: usize = 128;

// ── Query params ──

#[derive(Deserialize)]
pub struct PostListParams {
    page: Option<i64>,
    tag: Option<String>,
}

// ── Helpers ──

/// Loads a post the caller is allowed to see. Drafts exist only for their
/// author; everyone else gets 404.
pub(crate) async fn visible_post(state: &AppState, id: i64, viewer: Option<i64>) -> ApiResult<Post> {
    let post = state.store.get_post(id).await?.ok_or(ApiError::NotFound)?;
    if post.status == PostStatus::Draft && viewer != Some(post.author_id) {
        return Err(ApiError::NotFound);
    }
    Ok(post)
}

fn clean_title(raw: &str) -> ApiResult<String> {
    let title = ammonia::clean(raw.trim());
    if title.trim().is_empty() {
        return Err(ApiError::BadRequest("title may not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::BadRequest(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title)
}

fn clean_content(raw: serde_json::Value) -> ApiResult<serde_json::Value> {
    let body = content::sanitize(raw);
    if content::word_count(&body) == 0 {
        return Err(ApiError::BadRequest("essay body may not be empty".into()));
    }
    Ok(body)
}

fn viewer_hash(post_id: i64, identity: &str) -> String {
    let digest = Sha256::digest(format!("{post_id}:{identity}").as_bytes());
    hex::encode(digest)
}

// ── Handlers ──

/// GET /api/posts?page=1&tag=rust
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<PostListParams>,
) -> ApiResult<Json<Paginated<PostSummary>>> {
    let per_page = state.per_page;
    let page = params.page.unwrap_or(1).max(1);
    let offset = usize::try_from((page - 1).saturating_mul(per_page)).unwrap_or(usize::MAX);

    let published = state.posts.published(&state.store).await?;
    let matching: Vec<&PostSummary> = match params.tag.as_deref().map(str::trim) {
        Some(tag) if !tag.is_empty() => published
            .iter()
            .filter(|post| post.tags.iter().any(|t| t == tag))
            .collect(),
        _ => published.iter().collect(),
    };

    let items = matching
        .iter()
        .skip(offset)
        .take(usize::try_from(per_page).unwrap_or(usize::MAX))
        .map(|post| (*post).clone())
        .collect();

    Ok(Json(Paginated {
        items,
        total: i64::try_from(matching.len()).unwrap_or(i64::MAX),
        page,
        per_page,
    }))
}

/// POST /api/posts
pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePost>,
) -> ApiResult<Json<Post>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let title = clean_title(&payload.title)?;
    let body = clean_content(payload.content)?;

    let post = state
        .store
        .create_post(
            user_id,
            NewPost {
                title,
                content: body,
                tags: content::normalize_tags(payload.tags),
                status: payload.status,
            },
        )
        .await?;
    state.posts.invalidate().await;
    tracing::info!(post_id = post.id, author_id = user_id, status = post.status.as_str(), "post created");

    Ok(Json(post))
}

/// GET /api/posts/:id
pub async fn get_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Post>> {
    let viewer = auth::optional_user_id(&headers, &state.jwt_secret);
    let post = visible_post(&state, id, viewer).await?;
    Ok(Json(post))
}

/// PUT /api/posts/:id — partial update by the author
pub async fn update_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePost>,
) -> ApiResult<Json<Post>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let current = visible_post(&state, id, Some(user_id)).await?;
    if current.author_id != user_id {
        return Err(ApiError::Forbidden);
    }
    if current.status == PostStatus::Published && payload.status == Some(PostStatus::Draft) {
        return Err(ApiError::Conflict(
            "a published essay cannot return to draft".into(),
        ));
    }

    let changes = PostChanges {
        title: payload.title.as_deref().map(clean_title).transpose()?,
        content: payload.content.map(clean_content).transpose()?,
        tags: payload.tags.map(content::normalize_tags),
        status: payload.status,
    };
    let post = state.store.update_post(id, changes).await?;
    state.posts.invalidate().await;
    if current.status != post.status {
        tracing::info!(post_id = id, "post published");
    }

    Ok(Json(post))
}

/// DELETE /api/posts/:id
pub async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let post = visible_post(&state, id, Some(user_id)).await?;
    if post.author_id != user_id {
        return Err(ApiError::Forbidden);
    }

    if !state.store.delete_post(id).await? {
        return Err(ApiError::NotFound);
    }
    state.posts.invalidate().await;
    tracing::info!(post_id = id, "post deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/posts/:id/views — counts once per reader
pub async fn record_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<RecordView>,
) -> ApiResult<Json<ViewResponse>> {
    let user_id = auth::optional_user_id(&headers, &state.jwt_secret);
    let post = visible_post(&state, id, user_id).await?;
    if post.status == PostStatus::Draft {
        return Ok(Json(ViewResponse {
            views: post.views,
            counted: false,
        }));
    }

    let viewer_key = payload
        .viewer
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty() && key.len() <= MAX_VIEWER_KEY_LEN);
    let identity = match (user_id, viewer_key) {
        (Some(uid), _) => format!("user:{uid}"),
        (None, Some(key)) => format!("anon:{key}"),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "anonymous views need a viewer key".into(),
            ))
        }
    };

    let (views, counted) = state.store.record_view(id, viewer_hash(id, &identity)).await?;
    if counted {
        state.posts.invalidate().await;
    }

    Ok(Json(ViewResponse { views, counted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_hash_is_stable_per_post() {
        let a = viewer_hash(1, "anon:browser-1");
        assert_eq!(a, viewer_hash(1, "anon:browser-1"));
        assert_ne!(a, viewer_hash(2, "anon:browser-1"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn titles_are_sanitized_and_required() {
        assert_eq!(clean_title("  On <b>Walking</b> ").expect("title"), "On <b>Walking</b>");
        assert!(clean_title("<script>x</script>").is_err());
        assert!(clean_title(&"a".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn empty_bodies_are_rejected() {
        assert!(clean_content(serde_json::json!({"blocks": []})).is_err());
        assert!(clean_content(serde_json::json!("words")).is_ok());
    }
}
