//! In-process object store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectInfo, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Object store held entirely in memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently in a bucket.
    pub async fn count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }

    /// Sorted keys of a bucket.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert with an explicit modification time.
    pub async fn put_at(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        last_modified: DateTime<Utc>,
    ) -> StorageResult<()> {
        validate_key(key)?;
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, last_modified });
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.put_at(bucket, key, data, Utc::now()).await
    }

    async fn put_if_absent(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<bool> {
        validate_key(key)?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets.entry(bucket.to_string()).or_default();
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| ObjectInfo {
                key: key.to_string(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
            })
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(key, obj)| ObjectInfo {
                        key: key.clone(),
                        size: obj.data.len() as u64,
                        last_modified: Some(obj.last_modified),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.buckets
            .write()
            .await
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn check_bucket(&self, _bucket: &str) -> StorageResult<()> {
        Ok(())
    }
}
