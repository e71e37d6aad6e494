//! Library-wide error types
//!
//! `AppError` is what crosses the component boundary to callers: REST
//! failures, configuration problems and session misuse. Stream failures use
//! [`crate::transport::TransportError`] and stay inside the supervisor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-wide error type
///
/// Serializable so a presentation layer can forward it as-is.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// The server answered with a non-2xx status
    #[error("{message} (HTTP {status}, code {code})")]
    Api {
        status: u16,
        message: String,
        code: i64,
    },

    /// The request never produced a response (DNS, connect, TLS, timeout)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// No bearer token is available for an authenticated call
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The server address cannot be turned into an endpoint URL
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    /// The operation has no endpoint for the selected feed
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AppError {
    /// Whether the server rejected the credentials
    ///
    /// The session layer uses this to invalidate the token; the supervisor
    /// then observes the cleared token and stops reconnecting.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Api { status: 401, .. })
    }

    /// HTTP status of an API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<AppError> for String {
    fn from(error: AppError) -> String {
        error.to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::SerializationError(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = AppError::Api {
            status: 404,
            message: "Message not found".to_string(),
            code: 404,
        };
        assert_eq!(err.to_string(), "Message not found (HTTP 404, code 404)");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_is_unauthorized() {
        let err = AppError::Api {
            status: 401,
            message: "Invalid token".to_string(),
            code: 401,
        };
        assert!(err.is_unauthorized());
        assert!(!AppError::NotAuthenticated.is_unauthorized());
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_value(AppError::Unsupported("x".to_string())).unwrap();
        assert_eq!(json["type"], "Unsupported");
        assert_eq!(json["message"], "x");
    }
}
