//! The object store abstraction shared by every stage.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_models::ItemKey;

use crate::error::{StorageError, StorageResult};

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified time, when the backend reports one
    pub last_modified: Option<DateTime<Utc>>,
}

/// Check that a key is safe to store and to use as a scratch filename.
pub fn validate_key(key: &str) -> StorageResult<()> {
    ItemKey::parse(key)
        .map(|_| ())
        .map_err(|e| StorageError::InvalidKey(e.to_string()))
}

/// Mapping from bucket + key to blob content.
///
/// `put` overwrites. Callers needing create-if-absent use `put_if_absent`,
/// which is exclusive on every backend; `exists` followed by `put` is racy.
/// Any operation may fail transiently, and retry policy belongs to callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Write an object, replacing any existing content.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Create an object only if the key is free. Returns `false` when it
    /// already existed (nothing written).
    async fn put_if_absent(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<bool>;

    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Size and modification time of one object.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    /// All objects in a bucket, in no particular order.
    async fn list(&self, bucket: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Remove an object.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Check if an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.head(bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Upload a local file. Returns the number of bytes written.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let data = tokio::fs::read(path).await?;
        let len = data.len() as u64;
        self.put(bucket, key, data).await?;
        Ok(len)
    }

    /// Download an object into a local file, creating parent directories.
    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let data = self.get(bucket, key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::download_failed(format!("Failed to create directory: {}", e))
            })?;
        }

        let len = data.len() as u64;
        tokio::fs::write(path, data)
            .await
            .map_err(|e| StorageError::download_failed(format!("Failed to write file: {}", e)))?;
        Ok(len)
    }

    /// Cheap reachability check for readiness probes.
    async fn check_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.list(bucket).await.map(|_| ())
    }
}
