//! Workspace-level error type shared by configuration and telemetry.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for the non-queue parts of Singlet.
///
/// Queue operations have their own error type in `singlet-queue`; this one
/// covers configuration loading, telemetry setup and other plumbing.
#[derive(Error, Debug)]
pub enum SingletError {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Redis/Cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Telemetry could not be installed
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SingletError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Cache(_))
    }
}

/// Result alias used across the workspace.
pub type SingletResult<T> = Result<T, SingletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SingletError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(
            SingletError::configuration("x").error_code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(SingletError::internal("x").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_is_retriable() {
        assert!(SingletError::Database("down".into()).is_retriable());
        assert!(SingletError::Cache("down".into()).is_retriable());
        assert!(!SingletError::validation("bad").is_retriable());
    }

    #[test]
    fn test_from_anyhow() {
        let err: SingletError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
