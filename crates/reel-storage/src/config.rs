//! Storage backend selection.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::client::{S3Config, S3Store};
use crate::error::{StorageError, StorageResult};
use crate::layout::StorageLayout;
use crate::local::LocalStore;
use crate::memory::MemoryStore;
use crate::store::ObjectStore;

/// Which `ObjectStore` implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" | "r2" | "gcs" => Ok(StorageBackend::S3),
            "local" | "fs" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND '{}'",
                other
            ))),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3: S3Config,
    /// Root directory for the local backend
    pub local_root: PathBuf,
    pub layout: StorageLayout,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            s3: S3Config::default(),
            local_root: PathBuf::from("./data"),
            layout: StorageLayout::default(),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::S3,
        };

        let layout = StorageLayout::from_env();
        layout.validate()?;

        Ok(Self {
            backend,
            s3: S3Config::from_env(),
            local_root: std::env::var("STORAGE_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            layout,
        })
    }

    /// Build the configured backend.
    pub async fn connect(&self) -> StorageResult<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match self.backend {
            StorageBackend::S3 => Arc::new(S3Store::new(self.s3.clone()).await?),
            StorageBackend::Local => Arc::new(LocalStore::new(self.local_root.clone())),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        info!(backend = store.backend_name(), "Object store ready");
        Ok(store)
    }
}
