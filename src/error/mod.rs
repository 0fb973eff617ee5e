use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Insight error: {0}")]
    Insight(#[from] InsightError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Duplicate record: {message}")]
    Duplicate { message: String },

    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Domain errors for the analysis pipeline and the comparison service.
///
/// Every variant aborts the whole unit of work it occurs in.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Validation failed: {field} - {reason}")]
    InputValidation { field: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Upstream provider failure: {message}")]
    UpstreamProvider { message: String },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// A server-side invariant broke; never the caller's fault.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl InsightError {
    /// Shorthand for an input validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        InsightError::InputValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            InsightError::InputValidation { .. } => "input_validation",
            InsightError::NotFound { .. } => "not_found",
            InsightError::Conflict { .. } => "conflict",
            InsightError::UpstreamProvider { .. } => "upstream_provider_failure",
            InsightError::PreconditionFailed { .. } => "precondition_failed",
            InsightError::Timeout { .. } => "timeout",
            InsightError::Storage(_) => "storage",
            InsightError::Internal { .. } => "internal",
        }
    }

    /// HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            InsightError::InputValidation { .. } | InsightError::PreconditionFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            InsightError::NotFound { .. } => StatusCode::NOT_FOUND,
            InsightError::Conflict { .. } => StatusCode::CONFLICT,
            InsightError::UpstreamProvider { .. } => StatusCode::BAD_GATEWAY,
            InsightError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            InsightError::Storage(_) | InsightError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<LangbaseError> for InsightError {
    fn from(err: LangbaseError) -> Self {
        InsightError::UpstreamProvider {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for InsightError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate { message } => InsightError::Conflict { message },
            other => InsightError::Storage(other),
        }
    }
}

/// HTTP-facing errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid organization identity: {message}")]
    Unauthorized { message: String },

    #[error(transparent)]
    Insight(#[from] InsightError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Insight(err) => (err.status(), err.code()),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for pipeline and comparison operations
pub type InsightResult<T> = Result<T, InsightError>;

/// Result type alias for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;
