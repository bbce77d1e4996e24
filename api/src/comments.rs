use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use essayist_shared::{CommentNode, CreateComment};

use crate::comment_tree::build_comment_tree;
use crate::error::{ApiError, ApiResult};
use crate::posts::visible_post;
use crate::{auth, AppState};

const MAX_COMMENT_LEN: usize = 10_000;

/// Refetches every comment of the post and rebuilds the whole forest.
async fn rebuild_tree(state: &AppState, post_id: i64) -> ApiResult<Vec<CommentNode>> {
    let comments = state.store.comments_for_post(post_id).await?;
    Ok(build_comment_tree(&state.store, comments).await)
}

/// GET /api/posts/:id/comments
pub async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
) -> ApiResult<Json<Vec<CommentNode>>> {
    let viewer = auth::optional_user_id(&headers, &state.jwt_secret);
    visible_post(&state, post_id, viewer).await?;

    Ok(Json(rebuild_tree(&state, post_id).await?))
}

/// POST /api/posts/:id/comments — a root comment, or a reply when
/// `parent_id` is set. Responds with the rebuilt tree.
pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateComment>,
) -> ApiResult<Json<Vec<CommentNode>>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    let body = ammonia::clean(payload.body.trim());

    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("comment may not be empty".into()));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::BadRequest(format!(
            "comment must be at most {MAX_COMMENT_LEN} characters"
        )));
    }

    visible_post(&state, post_id, Some(user_id)).await?;

    if let Some(parent_id) = payload.parent_id {
        let parent = state.store.get_comment(parent_id).await?;
        if !matches!(parent, Some(ref parent) if parent.post_id == post_id) {
            return Err(ApiError::BadRequest(
                "parent comment does not belong to this post".into(),
            ));
        }
    }

    let comment = state
        .store
        .create_comment(post_id, user_id, body, payload.parent_id)
        .await?;
    tracing::debug!(comment_id = comment.id, post_id, user_id, "comment created");

    Ok(Json(rebuild_tree(&state, post_id).await?))
}

/// DELETE /api/comments/:id — by its author. Replies stay and become roots.
pub async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<CommentNode>>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let comment = state.store.get_comment(id).await?.ok_or(ApiError::NotFound)?;
    if comment.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    if !state.store.delete_comment(id).await? {
        return Err(ApiError::NotFound);
    }
    tracing::debug!(comment_id = id, post_id = comment.post_id, "comment deleted");

    Ok(Json(rebuild_tree(&state, comment.post_id).await?))
}
