use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use essayist_shared::{Profile, UpdateProfile, User};

use crate::content;
use crate::error::{ApiError, ApiResult};
use crate::{auth, AppState};

const MAX_BIO_LEN: usize = 2_000;

/// GET /api/users/:id — public profile with the author's published essays
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Profile>> {
    let user = state.store.get_user(id).await?.ok_or(ApiError::NotFound)?;

    let published = state.posts.published(&state.store).await?;
    let posts: Vec<_> = published
        .iter()
        .filter(|post| post.author_id == id)
        .cloned()
        .collect();
    let total_views = posts.iter().map(|post| post.views).sum();

    Ok(Json(Profile {
        user,
        post_count: i64::try_from(posts.len()).unwrap_or(i64::MAX),
        total_views,
        posts,
    }))
}

/// PUT /api/users/me
pub async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfile>,
) -> ApiResult<Json<User>> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;

    let bio = payload.bio.map(|bio| ammonia::clean(bio.trim()));
    if bio.as_ref().is_some_and(|bio| bio.chars().count() > MAX_BIO_LEN) {
        return Err(ApiError::BadRequest(format!(
            "bio must be at most {MAX_BIO_LEN} characters"
        )));
    }
    let avatar_url = payload.avatar_url.map(|url| url.trim().to_string());
    if let Some(url) = avatar_url.as_deref() {
        if !url.is_empty() && !content::is_web_url(url) {
            return Err(ApiError::BadRequest("avatar_url must be an http(s) URL".into()));
        }
    }

    let user = state.store.update_profile(user_id, avatar_url, bio).await?;
    Ok(Json(user))
}
