//! Bucket layout: one bucket per pipeline stage plus a control bucket.

use std::path::Path;
use std::sync::Arc;

use reel_models::StageName;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore};

/// Bucket names for each stage store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub quarantine: String,
    pub normalized: String,
    pub compilations: String,
    /// Published-archive store; `None` disables archiving
    pub archive: Option<String>,
    /// Lease and publish markers. Never a stage store.
    pub control: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            quarantine: "reel-quarantine".to_string(),
            normalized: "reel-normalized".to_string(),
            compilations: "reel-compilations".to_string(),
            archive: None,
            control: "reel-control".to_string(),
        }
    }
}

impl StorageLayout {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            quarantine: std::env::var("QUARANTINE_BUCKET").unwrap_or(defaults.quarantine),
            normalized: std::env::var("NORMALIZED_BUCKET").unwrap_or(defaults.normalized),
            compilations: std::env::var("COMPILATIONS_BUCKET").unwrap_or(defaults.compilations),
            archive: std::env::var("ARCHIVE_BUCKET").ok().filter(|s| !s.is_empty()),
            control: std::env::var("CONTROL_BUCKET").unwrap_or(defaults.control),
        }
    }

    pub fn with_archive(mut self, bucket: impl Into<String>) -> Self {
        self.archive = Some(bucket.into());
        self
    }

    /// Bucket holding a stage, if that stage is configured.
    pub fn bucket(&self, stage: StageName) -> Option<&str> {
        match stage {
            StageName::Quarantine => Some(&self.quarantine),
            StageName::Normalized => Some(&self.normalized),
            StageName::Compilations => Some(&self.compilations),
            StageName::Archive => self.archive.as_deref(),
        }
    }

    /// Every configured bucket, control included.
    pub fn all_buckets(&self) -> Vec<&str> {
        let mut buckets: Vec<&str> = StageName::ALL
            .iter()
            .filter_map(|stage| self.bucket(*stage))
            .collect();
        buckets.push(&self.control);
        buckets
    }

    /// Two stages sharing a bucket would let items exist in both at once.
    pub fn validate(&self) -> StorageResult<()> {
        let buckets = self.all_buckets();
        for (i, a) in buckets.iter().enumerate() {
            if a.is_empty() {
                return Err(StorageError::config_error("bucket names must not be empty"));
            }
            if buckets[i + 1..].contains(a) {
                return Err(StorageError::config_error(format!(
                    "bucket '{}' is assigned to more than one store",
                    a
                )));
            }
        }
        Ok(())
    }
}

/// An object store bound to the pipeline layout.
///
/// Stage code addresses stores by `StageName` and never sees bucket names.
#[derive(Clone)]
pub struct StageStores {
    store: Arc<dyn ObjectStore>,
    layout: StorageLayout,
}

impl StageStores {
    pub fn new(store: Arc<dyn ObjectStore>, layout: StorageLayout) -> Self {
        Self { store, layout }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn control_bucket(&self) -> &str {
        &self.layout.control
    }

    fn bucket(&self, stage: StageName) -> StorageResult<&str> {
        self.layout
            .bucket(stage)
            .ok_or_else(|| StorageError::config_error(format!("no bucket configured for {}", stage)))
    }

    pub fn has_stage(&self, stage: StageName) -> bool {
        self.layout.bucket(stage).is_some()
    }

    pub async fn exists(&self, stage: StageName, key: &str) -> StorageResult<bool> {
        self.store.exists(self.bucket(stage)?, key).await
    }

    pub async fn head(&self, stage: StageName, key: &str) -> StorageResult<ObjectInfo> {
        self.store.head(self.bucket(stage)?, key).await
    }

    pub async fn list(&self, stage: StageName) -> StorageResult<Vec<ObjectInfo>> {
        self.store.list(self.bucket(stage)?).await
    }

    pub async fn put_file(&self, stage: StageName, key: &str, path: &Path) -> StorageResult<u64> {
        self.store.put_file(self.bucket(stage)?, key, path).await
    }

    pub async fn get_to_file(&self, stage: StageName, key: &str, path: &Path) -> StorageResult<u64> {
        self.store.get_to_file(self.bucket(stage)?, key, path).await
    }

    pub async fn delete(&self, stage: StageName, key: &str) -> StorageResult<()> {
        self.store.delete(self.bucket(stage)?, key).await
    }

    /// Reach every configured bucket, returning each bucket's outcome.
    pub async fn probe(&self) -> Vec<(String, StorageResult<()>)> {
        let mut outcomes = Vec::new();
        for bucket in self.layout.all_buckets() {
            outcomes.push((bucket.to_string(), self.store.check_bucket(bucket).await));
        }
        outcomes
    }
}
