use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LimiterResult<T> = Result<T, LimiterError>;

/// Failures the limiter can surface. None of these carries an admit/deny
/// decision: storage trouble always reaches the HTTP layer as an error,
/// where it fails closed with a server error.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),
    #[error("malformed stored state: {0}")]
    MalformedState(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        // Fail closed: a broken limiter rejects, it never silently admits.
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<anyhow::Error> for LimiterError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(value: redis::RedisError) -> Self {
        if value.kind() == redis::ErrorKind::TypeError {
            Self::MalformedState(value.to_string())
        } else {
            Self::StorageUnavailable(value.to_string())
        }
    }
}
