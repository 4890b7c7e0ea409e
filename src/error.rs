//! Error types and handling for Gridpulse
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Gridpulse operations
pub type Result<T> = std::result::Result<T, GridpulseError>;

/// Main error type for Gridpulse
#[derive(Debug, Error)]
pub enum GridpulseError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Authentication/authorization errors (invalid credentials, rejected login)
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Access or refresh token no longer accepted by the provider
    #[error("Token expired: {message}")]
    TokenExpired { message: String },

    /// Two-factor verification required to proceed with a login
    #[error("Two-factor verification required: {message}")]
    TwoFactorRequired { message: String },

    /// Network-related errors (connect/transport failures)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Provider API errors (non-auth, non-transport upstream failures)
    #[error("API error: {message}")]
    Api { message: String },

    /// Statistics store errors
    #[error("Statistics error: {message}")]
    Statistics { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl GridpulseError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GridpulseError::Config {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        GridpulseError::Auth {
            message: message.into(),
        }
    }

    /// Create a new token-expired error
    pub fn token_expired<S: Into<String>>(message: S) -> Self {
        GridpulseError::TokenExpired {
            message: message.into(),
        }
    }

    /// Create a new two-factor-required error
    pub fn two_factor_required<S: Into<String>>(message: S) -> Self {
        GridpulseError::TwoFactorRequired {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        GridpulseError::Network {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        GridpulseError::Api {
            message: message.into(),
        }
    }

    /// Create a new statistics error
    pub fn statistics<S: Into<String>>(message: S) -> Self {
        GridpulseError::Statistics {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GridpulseError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GridpulseError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        GridpulseError::Generic {
            message: message.into(),
        }
    }

    /// Whether this error means the stored tokens are no longer usable.
    ///
    /// The coordinator reacts to this class by attempting one automatic
    /// re-authentication; everything else is treated as transient.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GridpulseError::Auth { .. } | GridpulseError::TokenExpired { .. }
        )
    }
}

impl From<std::io::Error> for GridpulseError {
    fn from(err: std::io::Error) -> Self {
        GridpulseError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GridpulseError {
    fn from(err: serde_yaml::Error) -> Self {
        GridpulseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GridpulseError {
    fn from(err: serde_json::Error) -> Self {
        GridpulseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GridpulseError {
    fn from(err: reqwest::Error) -> Self {
        GridpulseError::network(err.to_string())
    }
}

impl From<chrono::ParseError> for GridpulseError {
    fn from(err: chrono::ParseError) -> Self {
        GridpulseError::Validation {
            field: "datetime".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GridpulseError::config("test config error");
        assert!(matches!(err, GridpulseError::Config { .. }));

        let err = GridpulseError::token_expired("refresh token rejected");
        assert!(matches!(err, GridpulseError::TokenExpired { .. }));

        let err = GridpulseError::validation("field", "test validation error");
        assert!(matches!(err, GridpulseError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = GridpulseError::network("connection refused");
        assert_eq!(format!("{}", err), "Network error: connection refused");

        let err = GridpulseError::validation("pricing.peak_start_hour", "must be 0..=23");
        assert_eq!(
            format!("{}", err),
            "Validation error: pricing.peak_start_hour - must be 0..=23"
        );
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(GridpulseError::auth("bad credentials").is_auth_failure());
        assert!(GridpulseError::token_expired("expired").is_auth_failure());
        assert!(!GridpulseError::network("timeout").is_auth_failure());
        assert!(!GridpulseError::api("500").is_auth_failure());
    }
}
