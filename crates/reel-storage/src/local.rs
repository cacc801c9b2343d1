//! Filesystem-backed object store: one directory per bucket.
//!
//! Intended for single-host deployments and local development. Writes go to
//! a hidden temp file that is renamed into place, so readers never observe a
//! partial object.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectInfo, ObjectStore};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_key(bucket).map_err(|_| StorageError::config_error(format!("invalid bucket name '{}'", bucket)))?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }

    fn temp_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        Ok(self
            .bucket_dir(bucket)?
            .join(format!(".tmp-{}", Uuid::new_v4())))
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

fn map_missing(err: std::io::Error, bucket: &str, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::not_found(format!("{}/{}", bucket, key))
    } else {
        StorageError::Io(err)
    }
}

fn info_from_metadata(key: &str, metadata: &std::fs::Metadata) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: metadata.len(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<()> {
        let target = self.object_path(bucket, key)?;
        self.ensure_bucket(bucket).await?;

        let tmp = self.temp_path(bucket)?;
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }

        debug!("Stored {} bytes at {}", data.len(), target.display());
        Ok(())
    }

    async fn put_if_absent(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<bool> {
        let target = self.object_path(bucket, key)?;
        self.ensure_bucket(bucket).await?;

        // Fully written before it becomes visible; linking never replaces.
        let tmp = self.temp_path(bucket)?;
        fs::write(&tmp, &data).await?;

        let linked = fs::hard_link(&tmp, &target).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::upload_failed(e.to_string())),
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).await.map_err(|e| map_missing(e, bucket, key))
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let path = self.object_path(bucket, key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| map_missing(e, bucket, key))?;
        Ok(info_from_metadata(key, &metadata))
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<ObjectInfo>> {
        let dir = self.bucket_dir(bucket)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::list_failed(e.to_string())),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // Hidden names are in-flight temp files.
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                objects.push(info_from_metadata(&name, &metadata));
            }
        }

        Ok(objects)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| map_missing(e, bucket, key))
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let target = self.object_path(bucket, key)?;
        self.ensure_bucket(bucket).await?;

        let tmp = self.temp_path(bucket)?;
        let len = fs::copy(path, &tmp).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }
        Ok(len)
    }

    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let source = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, path)
            .await
            .map_err(|e| map_missing(e, bucket, key))
    }

    async fn check_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.ensure_bucket(bucket).await.map(|_| ())
    }
}
