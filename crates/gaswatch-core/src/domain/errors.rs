//! Domain error types
//!
//! This module defines error types specific to domain operations
//! (descriptor validation) and the typed failures backend adapters
//! report through the data-service ports.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A field or source name is not a plain identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Limit must be a positive integer
    #[error("Invalid limit: {0}")]
    InvalidLimit(i64),

    /// Poll interval must be a positive number of milliseconds
    #[error("Invalid poll interval: {0}ms")]
    InvalidPollInterval(u64),

    /// Ordering clause could not be parsed
    #[error("Invalid ordering: {0}")]
    InvalidOrder(String),

    /// Filter clause could not be parsed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Typed failures reported by backend adapters
///
/// Adapters wrap these in `anyhow::Error`; the sync layer's classifier
/// downcasts them to decide the error kind. `Coded` carries a raw
/// backend status code (PostgREST / SQLSTATE style) when the adapter does
/// not map it itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The read was rejected by the backend's access policy
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A point read that requires a row found none
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend did not answer in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A raw coded failure
    #[error("Backend error [{code}]: {message}")]
    Coded {
        /// Backend status code, e.g. `42501`
        code: String,
        /// Backend-provided message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidIdentifier("bad field".to_string());
        assert_eq!(err.to_string(), "Invalid identifier: bad field");

        let err = DomainError::InvalidLimit(0);
        assert_eq!(err.to_string(), "Invalid limit: 0");

        let err = BackendError::Coded {
            code: "42501".to_string(),
            message: "insufficient privilege".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend error [42501]: insufficient privilege"
        );
    }

    #[test]
    fn test_backend_error_downcasts_through_anyhow() {
        let err = anyhow::Error::new(BackendError::PermissionDenied("devices".to_string()));
        let err = err.context("fetching devices");

        let found = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<BackendError>());
        assert_eq!(
            found,
            Some(&BackendError::PermissionDenied("devices".to_string()))
        );
    }
}
