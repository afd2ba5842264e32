//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-related errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Missing or malformed argument (queue name, job id, payload, update).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted before `initialize()` or after `stop()`.
    #[error("Queue adapter not initialized")]
    NotInitialized,

    /// The manager already holds an active adapter.
    #[error("Queue already initialized; call close_queue() first")]
    AlreadyInitialized,

    /// No driver is registered for the requested database type.
    #[error("Database driver not available: {0}")]
    DriverUnavailable(String),

    /// Invalid job state.
    #[error("Invalid job state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        QueueError::InvalidArgument(message.into())
    }

    /// Returns true if this error comes from a backend and may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::Database(_) | QueueError::Redis(_) | QueueError::Pool(_)
        )
    }

    /// Returns true for errors caused by the caller rather than the backend.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            QueueError::InvalidArgument(_)
                | QueueError::NotInitialized
                | QueueError::AlreadyInitialized
                | QueueError::InvalidState { .. }
        )
    }
}

impl From<singlet_core::SingletError> for QueueError {
    fn from(err: singlet_core::SingletError) -> Self {
        QueueError::Internal(err.to_string())
    }
}

/// Validate a queue name argument.
pub(crate) fn ensure_queue_name(queue: &str) -> QueueResult<()> {
    if queue.trim().is_empty() {
        return Err(QueueError::invalid_argument("queue name must be a non-empty string"));
    }
    Ok(())
}
