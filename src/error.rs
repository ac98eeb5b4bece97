//! # Error Handling
//!
//! Defines the application error taxonomy and how errors are converted
//! to HTTP responses.
//!
//! ## Error Categories:
//! - **InvalidState**: an operation was attempted against a session or
//!   answer that is not in the required state. Usually a race between
//!   event sources; the operation is aborted and surfaced.
//! - **StaleAnswer**: a background job result arrived for an answer
//!   that has already moved on. Expected under racing end-of-turn
//!   signals; logged and dropped, never fatal.
//! - **InvalidScore**: the analysis produced a score component outside
//!   its declared range. Triggers the degraded scoring path.
//! - **DependencyFailure**: a speech-to-text or scoring collaborator
//!   failed. Retried a bounded number of times, then falls back so the
//!   session always progresses.
//! - **SessionInactive**: a guard check failed; all queued side effects
//!   for that job are skipped without propagating an error.
//!
//! The remaining variants cover the HTTP surface (auth, lookup,
//! configuration, internal failures).

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Operation attempted against an answer/session in the wrong state
    InvalidState(String),

    /// Background result arrived for an answer no longer awaiting it
    StaleAnswer(String),

    /// Analysis output with a component outside its declared range
    InvalidScore(String),

    /// Speech-to-text or scoring collaborator failure
    DependencyFailure(String),

    /// Guard check failed: the target session is no longer live
    SessionInactive(String),

    /// Connection token is unknown, expired, or revoked
    Unauthorized(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            AppError::StaleAnswer(msg) => write!(f, "Stale answer: {}", msg),
            AppError::InvalidScore(msg) => write!(f, "Invalid score: {}", msg),
            AppError::DependencyFailure(msg) => write!(f, "Dependency failure: {}", msg),
            AppError::SessionInactive(msg) => write!(f, "Session inactive: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::InvalidState(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "invalid_state",
                msg.clone(),
            ),
            AppError::StaleAnswer(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "stale_answer",
                msg.clone(),
            ),
            AppError::InvalidScore(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_score",
                msg.clone(),
            ),
            AppError::DependencyFailure(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "dependency_failure",
                msg.clone(),
            ),
            AppError::SessionInactive(msg) => (
                actix_web::http::StatusCode::GONE,
                "session_inactive",
                msg.clone(),
            ),
            AppError::Unauthorized(msg) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "unauthorized",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = AppError::StaleAnswer("answer already scored".to_string());
        assert_eq!(err.to_string(), "Stale answer: answer already scored");

        let err = AppError::SessionInactive("abc".to_string());
        assert!(err.to_string().starts_with("Session inactive"));
    }

    #[test]
    fn test_http_status_mapping() {
        use actix_web::http::StatusCode;

        assert_eq!(
            AppError::InvalidState(String::new())
                .error_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::SessionInactive(String::new())
                .error_response()
                .status(),
            StatusCode::GONE
        );
        assert_eq!(
            AppError::Unauthorized(String::new())
                .error_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
