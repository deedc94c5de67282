//! Error types and handling for Helion
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Helion operations
pub type Result<T> = std::result::Result<T, HelionError>;

/// Main error type for Helion
#[derive(Debug, Error)]
pub enum HelionError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network-related errors (pricing API, transport)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authentication/authorization errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Durable store errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HelionError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelionError::Config {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HelionError::Network {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HelionError::Auth {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HelionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        HelionError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelionError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HelionError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HelionError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for HelionError {
    fn from(err: std::io::Error) -> Self {
        HelionError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelionError {
    fn from(err: serde_yaml::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelionError {
    fn from(err: serde_json::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HelionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HelionError::timeout(err.to_string())
        } else {
            HelionError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for HelionError {
    fn from(err: chrono::ParseError) -> Self {
        HelionError::validation("datetime", &err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HelionError::config("test config error");
        assert!(matches!(err, HelionError::Config { .. }));

        let err = HelionError::network("test network error");
        assert!(matches!(err, HelionError::Network { .. }));

        let err = HelionError::validation("field", "test validation error");
        assert!(matches!(err, HelionError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HelionError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Configuration error: test error");

        let err = HelionError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");
    }
}
