use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("authentication required")]
    Unauthorized,
    #[error("not allowed")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    /// A stored record failed schema validation on read.
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("upstream feed error: {0}")]
    Upstream(String),
    #[error("credential hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] r2d2::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized | ApiError::Token(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Decode(_)
            | ApiError::Hash(_)
            | ApiError::Sqlite(_)
            | ApiError::Pool(_)
            | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ApiError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match self {
                ApiError::Upstream(_) => "feed unavailable".to_string(),
                _ => "store unavailable".to_string(),
            }
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
            self.to_string()
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::Conflict("name already taken".into());
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "name already taken");
    }

    #[test]
    fn store_failures_are_server_errors() {
        let err = ApiError::Decode("bad status".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::Upstream("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
