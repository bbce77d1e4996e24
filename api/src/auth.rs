use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use essayist_shared::{AuthResponse, LoginRequest, RegisterRequest, User};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::store::NewUser;
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 40;
const TOKEN_LIFETIME_DAYS: i64 = 30;

// ── JWT Claims ──

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,   // user id
    pub exp: usize, // expiry (unix timestamp)
}

impl Claims {
    pub fn new(user_id: i64) -> Self {
        let exp = (Utc::now() + Duration::days(TOKEN_LIFETIME_DAYS)).timestamp();
        Self {
            sub: user_id,
            exp: usize::try_from(exp).unwrap_or(usize::MAX),
        }
    }
}

pub fn issue_token(user_id: i64, jwt_secret: &str) -> ApiResult<String> {
    let token = encode(
        &Header::default(),
        &Claims::new(user_id),
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

// ── Extract authenticated user from Authorization header ──

pub fn extract_user_id(headers: &HeaderMap, jwt_secret: &str) -> ApiResult<i64> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims.sub)
}

/// Like [`extract_user_id`], but anonymous callers are fine.
pub fn optional_user_id(headers: &HeaderMap, jwt_secret: &str) -> Option<i64> {
    extract_user_id(headers, jwt_secret).ok()
}

// ── Credentials ──

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::Hash(err.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(password_hash).map_err(|err| ApiError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn validate_registration(req: &RegisterRequest) -> ApiResult<()> {
    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "name must be 1 to {MAX_NAME_LEN} characters"
        )));
    }
    let email = req.email.trim();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::BadRequest("email is not valid".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// ── Handlers ──

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    validate_registration(&payload)?;

    let password = payload.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let user = state
        .store
        .create_user(NewUser {
            name: ammonia::clean(payload.name.trim()),
            email: payload.email.trim().to_lowercase(),
            password_hash,
            avatar_url: payload.avatar_url.trim().to_string(),
            bio: ammonia::clean(payload.bio.trim()),
        })
        .await?;
    tracing::info!(user_id = user.id, name = %user.name, "user registered");

    let token = issue_token(user.id, &state.jwt_secret)?;
    Ok(Json(AuthResponse { token, user }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = payload.email.trim().to_lowercase();
    let Some((user, password_hash)) = state.store.find_login(email).await? else {
        return Err(ApiError::Unauthorized);
    };

    let password = payload.password;
    let matches =
        tokio::task::spawn_blocking(move || verify_password(&password, &password_hash)).await??;
    if !matches {
        tracing::debug!(user_id = user.id, "login rejected");
        return Err(ApiError::Unauthorized);
    }

    let token = issue_token(user.id, &state.jwt_secret)?;
    Ok(Json(AuthResponse { token, user }))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<User>> {
    let user_id = extract_user_id(&headers, &state.jwt_secret)?;
    let user = state.store.get_user(user_id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("correct horse").expect("hash");
        assert_ne!(hash, "correct horse");
        assert!(verify_password("correct horse", &hash).expect("verify"));
        assert!(!verify_password("battery staple", &hash).expect("verify"));
    }

    #[test]
    fn bearer_token_identifies_the_user() {
        let token = issue_token(42, "secret").expect("token");
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        assert_eq!(extract_user_id(&headers, "secret").expect("valid"), 42);
        assert!(matches!(
            extract_user_id(&headers, "other-secret"),
            Err(ApiError::Token(_))
        ));
        assert!(optional_user_id(&HeaderMap::new(), "secret").is_none());
    }

    #[test]
    fn registration_rules() {
        let valid = RegisterRequest {
            name: "ada".into(),
            email: "ada@example.com".into(),
            password: "long enough".into(),
            avatar_url: String::new(),
            bio: String::new(),
        };
        assert!(validate_registration(&valid).is_ok());

        let short = RegisterRequest {
            password: "short".into(),
            ..valid.clone()
        };
        assert!(matches!(validate_registration(&short), Err(ApiError::BadRequest(_))));

        let no_email = RegisterRequest {
            email: "ada.example.com".into(),
            ..valid
        };
        assert!(matches!(validate_registration(&no_email), Err(ApiError::BadRequest(_))));
    }
}
