//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

/// Failures of the trigger transport.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis could not be reached at all
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The stream rejected an event
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An event that does not serialize will never serialize
    #[error("Event encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueueError::Json(_))
    }
}
