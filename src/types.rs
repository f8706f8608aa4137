//! Error types shared across the crate.

use hyper::StatusCode;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error, mapped onto HTTP statuses at the route boundary.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or missing request fields (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, expired, or unusable credentials (401)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Authenticated but not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity lookup came up empty (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-index collision, e.g. duplicate email (409)
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Body read / transport problems on the request itself (400)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Language-model delegate failed in a load-bearing step (500)
    #[error("Delegate error: {0}")]
    Delegate(String),

    /// MongoDB failure (500, detail logged but not surfaced)
    #[error("Database error: {0}")]
    Database(String),

    /// Anything else (500, detail logged but not surfaced)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Http(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Delegate(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to put in a response body. Database and internal detail
    /// stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database operation failed".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Delegate(_) => "AI service request failed".to_string(),
            AppError::Validation(msg)
            | AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Duplicate(msg)
            | AppError::Http(msg) => msg.clone(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {e}"))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(e: mongodb::error::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Auth("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Duplicate("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Delegate("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_not_exposed() {
        let err = AppError::Database("connection string leaked".into());
        assert!(!err.public_message().contains("leaked"));

        let err = AppError::Validation("title is required".into());
        assert!(err.public_message().contains("title is required"));
    }
}
