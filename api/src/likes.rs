use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use essayist_shared::LikeResponse;

use crate::error::ApiResult;
use crate::posts::visible_post;
use crate::{auth, AppState};

/// GET /api/posts/:id/likes
pub async fn get_likes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
) -> ApiResult<Json<LikeResponse>> {
    let user_id = auth::optional_user_id(&headers, &state.jwt_secret);
    visible_post(&state, post_id, user_id).await?;

    let resp = state.store.like_state(post_id, user_id).await?;
    Ok(Json(resp))
}

/// POST /api/posts/:id/likes — toggles the caller's like
pub async fn toggle_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
) -> ApiResult<Json<LikeResponse>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    visible_post(&state, post_id, Some(user_id)).await?;

    let resp = state.store.toggle_like(post_id, user_id).await?;
    state.posts.invalidate().await;
    tracing::debug!(post_id, user_id, liked = resp.liked, "like toggled");

    Ok(Json(resp))
}
