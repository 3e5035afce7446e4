use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Upstream(String),
    Store(StoreError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            AppError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            AppError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => {
                tracing::warn!(error_type = "not_found", message = %msg, "Responding with 404");
                (StatusCode::NOT_FOUND, msg)
            }
            AppError::BadRequest(msg) => {
                tracing::warn!(error_type = "bad_request", message = %msg, "Responding with 400");
                (StatusCode::BAD_REQUEST, msg)
            }
            AppError::Upstream(msg) => {
                tracing::error!(error_type = "upstream", message = %msg, "Responding with 502");
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::Store(e) => {
                tracing::error!(error_type = "store", error = %e, "Responding with 500");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(e))
    }
}

impl From<CollectError> for AppError {
    fn from(e: CollectError) -> Self {
        match e {
            CollectError::Store(e) => AppError::Store(e),
            CollectError::Invariant(e) => AppError::BadRequest(e.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

/// A programming error in how counts or keys were produced.
///
/// Violations never panic, in debug or release builds. The collector logs
/// them at error level, skips the point and reports the run as failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("negative count in ratio: {numerator}/{denominator}")]
    NegativeCount { numerator: i64, denominator: i64 },

    #[error("negative {field}: {value}")]
    NegativeValue { field: &'static str, value: i64 },

    #[error("closed count {closed} exceeds created count {created}")]
    OpenCountUnderflow { created: u64, closed: u64 },

    #[error("count {0} does not fit in storage")]
    CountOverflow(u64),

    #[error("malformed bucket key {key:?} for {family}")]
    MalformedBucketKey { family: &'static str, key: String },
}

/// A failed call to an external API.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{url} returned {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl UpstreamError {
    /// HTTP status of a terminal non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status(), Some(403 | 429))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Why a collection run for one family failed.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("secret {0:?} is unavailable")]
    SecretUnavailable(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl From<StoreError> for CollectError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invariant(v) => CollectError::Invariant(v),
            other => CollectError::Store(other),
        }
    }
}
