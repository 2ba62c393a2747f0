//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sprachwelt_core::error::CoreError;
use sprachwelt_core::ports::PortError;
use tracing::error;
use utoipa::ToSchema;

use crate::adapters::content::ContentError;
use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authored content could not be loaded at startup.
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Represents an error that propagated up from one of the core components.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failed schema migration at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request lacks the authenticated user forwarded by the proxy.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A malformed request the core never saw.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        ApiError::Core(CoreError::StoreUnavailable(err.to_string()))
    }
}

impl ApiError {
    /// True for configuration problems, as opposed to dependency failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ApiError::Config(_) | ApiError::Content(_))
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Core(err) => (core_status(err), err.code()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ApiError::Database(_) | ApiError::Migration(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            ApiError::Config(_)
            | ApiError::Content(_)
            | ApiError::Io(_)
            | ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

/// HTTP status for each core error.
pub fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidGrade(_) | CoreError::InvalidUtterance(_) | CoreError::InvalidInput(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreError::Forbidden => StatusCode::FORBIDDEN,
        CoreError::UnknownScenario(_)
        | CoreError::UnknownState(_)
        | CoreError::UnknownCard(_)
        | CoreError::UnknownContent(_) => StatusCode::NOT_FOUND,
        CoreError::StateFrozen(_) => StatusCode::CONFLICT,
        CoreError::LlmUnavailable(_) | CoreError::LlmInvalidResponse(_) | CoreError::TtsUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        CoreError::LlmTimeout => StatusCode::GATEWAY_TIMEOUT,
        CoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The JSON error envelope returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable machine-readable code, e.g. `state_frozen`.
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() && !matches!(self, ApiError::Core(_)) {
            error!("Request failed: {:?}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody::new(code, message))).into_response()
    }
}
