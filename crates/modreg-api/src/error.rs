//! API error handling
//!
//! This module converts service errors into HTTP responses with appropriate
//! status codes. Error bodies are plain text, which is what module clients
//! print back to their users.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use modreg_service::ServiceError;
use std::fmt;
use tracing::{debug, error};

use crate::responses::PlainText;

/// API error type that can be converted to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    status_code: StatusCode,
    message: String,
    error_code: Option<&'static str>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            error_code: None,
        }
    }

    /// Create an API error with an error code
    pub fn with_code(
        status_code: StatusCode,
        message: impl Into<String>,
        error_code: &'static str,
    ) -> Self {
        Self {
            status_code,
            message: message.into(),
            error_code: Some(error_code),
        }
    }

    /// Create a bad request error (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, message, "INVALID_INPUT")
    }

    /// Create a not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// Create an internal server error (500)
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_ERROR")
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error_code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code.unwrap_or("UNSPECIFIED");
        if self.status_code.is_server_error() {
            error!(
                status = self.status_code.as_u16(),
                code,
                message = %self.message,
                "Request failed"
            );
        } else {
            debug!(
                status = self.status_code.as_u16(),
                code,
                message = %self.message,
                "Request rejected"
            );
        }

        let mut body = self.message;
        body.push('\n');
        (self.status_code, PlainText(body)).into_response()
    }
}

/// Convert ServiceError to ApiError
impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(format!("not found: {}", msg)),
            ServiceError::InvalidArchive(msg) => ApiError::with_code(
                StatusCode::BAD_REQUEST,
                format!("invalid module archive: {}", msg),
                "INVALID_ARCHIVE",
            ),
            ServiceError::InvalidInput(msg) => ApiError::bad_request(msg),
            ServiceError::AlreadyExists { module, version } => ApiError::with_code(
                StatusCode::CONFLICT,
                format!("module {}@{} already exists", module, version),
                "ALREADY_EXISTS",
            ),
            ServiceError::QuotaExceeded(dimension) => ApiError::with_code(
                StatusCode::FORBIDDEN,
                dimension.to_string(),
                "QUOTA_EXCEEDED",
            ),
            ServiceError::InvariantViolation(msg) => ApiError::with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("corrupt registry state: {}", msg),
                "INVARIANT_VIOLATION",
            ),
            ServiceError::Transport(msg) => ApiError::with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read upload: {}", msg),
                "TRANSPORT_ERROR",
            ),
            ServiceError::Database(msg) => ApiError::with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("database error: {}", msg),
                "DATABASE_ERROR",
            ),
            ServiceError::Internal(msg) => {
                ApiError::internal_server_error(format!("internal error: {}", msg))
            }
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
