use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoder::EncodeError;
use crate::store::StoreError;

/// Description returned for every 5xx response.
///
/// The real cause is only ever written to the server log.
pub const GENERIC_SERVER_ERROR: &str = "An unexpected error occurred";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Client vs Server Errors
///
/// - `Validation`, `Unauthorized`, `NotFound` and `RateLimited` are
///   recognized rejections: their message is safe to show to clients.
/// - Every other variant is reduced to [`GENERIC_SERVER_ERROR`] at the
///   response boundary and logged with full detail.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// HTTP status this error is rendered with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_)
            | AppError::Encoding(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing description. Server-side causes are never exposed.
    fn description(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::Unauthorized(msg) | AppError::NotFound(msg) => {
                msg.clone()
            }
            AppError::RateLimited { .. } => "Rate limit exceeded".to_string(),
            _ => GENERIC_SERVER_ERROR.to_string(),
        }
    }
}

impl From<EncodeError> for AppError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::ContentTooLong => AppError::Validation(err.to_string()),
            EncodeError::Render(msg) => AppError::Encoding(msg),
        }
    }
}

/// Uniform error body for every rejection.
///
/// ```json
/// { "code": 404, "name": "Not Found", "description": "QR code not found" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub name: String,
    pub description: String,
}

impl ErrorBody {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            name: status.canonical_reason().unwrap_or("Unknown").to_string(),
            description: description.into(),
        }
    }

    /// The opaque body used for unexpected failures.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_SERVER_ERROR)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = axum::Json(ErrorBody::new(status, self.description()));

        match self {
            AppError::RateLimited { retry_after_secs } => (
                status,
                [(RETRY_AFTER, retry_after_secs.max(1).to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
