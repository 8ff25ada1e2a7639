//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use larder_storage::StorageError;
use larder_upstream::UpstreamError;
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown repository: {0}")]
    UnknownRepo(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("upstream returned {0}")]
    UpstreamStatus(StatusCode),

    #[error("malformed upstream payload: {0}")]
    BadUpstreamPayload(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Grammar(#[from] larder_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::Grammar(_) => "invalid_request",
            Self::UnknownRepo(_) => "unknown_repo",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) | Self::UpstreamStatus(_) => "upstream_unavailable",
            Self::BadUpstreamPayload(_) => "bad_upstream_payload",
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => "not_found",
                StorageError::DigestMismatch { .. } => "digest_mismatch",
                _ => "storage_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Grammar(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRepo(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) | Self::UpstreamStatus(_) | Self::BadUpstreamPayload(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_client_error() {
            tracing::warn!(code = self.code(), error = %self, "request rejected");
        } else {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
