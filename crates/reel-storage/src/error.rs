//! Storage error types.

use std::fmt;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// The object operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Put,
    Get,
    Head,
    List,
    Delete,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
            StorageOp::Head => "head",
            StorageOp::List => "list",
            StorageOp::Delete => "delete",
        })
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or contradictory bucket layout, credentials or backend choice
    #[error("Storage misconfigured: {0}")]
    ConfigError(String),

    #[error("No such object: {0}")]
    NotFound(String),

    /// Keys are single path segments; anything else is refused before I/O
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// The backend answered, but the operation failed.
    #[error("Object {op} failed: {message}")]
    Backend { op: StorageOp, message: String },

    /// A bucket could not be reached at all.
    #[error("Bucket {bucket} unreachable: {message}")]
    Unreachable { bucket: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A control record that does not decode
    #[error("Malformed control record: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn backend(op: StorageOp, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            message: message.into(),
        }
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::backend(StorageOp::Put, msg)
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::backend(StorageOp::Get, msg)
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::backend(StorageOp::Delete, msg)
    }

    pub fn list_failed(msg: impl Into<String>) -> Self {
        Self::backend(StorageOp::List, msg)
    }

    pub fn unreachable(bucket: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            bucket: bucket.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Backend and I/O failures may clear up; a bad key, a bad layout, a
    /// missing object or a corrupt record will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Backend { .. } | StorageError::Unreachable { .. } | StorageError::Io(_)
        )
    }
}
