//! API error mapping.
//!
//! Every downstream failure is re-encoded as `{"error": "<description>"}`
//! with the status code the endpoint table specifies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use toska_store::StoreError;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("Unauthorized")]
    Unauthorized,

    /// Token bucket empty for this client.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Mutation attempted on a read-only follower.
    #[error("Read-only follower")]
    ReadOnly,

    /// Key absent or expired.
    #[error("not found")]
    NotFound,

    /// Client input failed validation.
    #[error("{0}")]
    BadRequest(String),

    /// Store is not running.
    #[error("store unavailable")]
    Unavailable,

    /// No follower is configured on this node.
    #[error("no follower configured")]
    NoFollower,

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ReadOnly => StatusCode::FORBIDDEN,
            ApiError::NotFound | ApiError::NoFollower => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({"error": self.to_string()}));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::NotRunning => ApiError::Unavailable,
            StoreError::InvalidKey
            | StoreError::InvalidPayload { .. }
            | StoreError::InvalidKeys
            | StoreError::InvalidPrefix
            | StoreError::InvalidOffset
            | StoreError::InvalidSnapshot { .. }
            | StoreError::InvalidChecksum { .. }
            | StoreError::InvalidReplicationRecord => ApiError::BadRequest(err.to_string()),
            StoreError::Io(_) | StoreError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<toska_repl::ReplError> for ApiError {
    fn from(err: toska_repl::ReplError) -> Self {
        match err {
            toska_repl::ReplError::InvalidOffset { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            toska_repl::ReplError::Store(inner) => inner.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
