//! Application state.

use std::sync::Arc;

use reel_media::ProcessRunner;
use reel_queue::TriggerQueue;
use reel_storage::{StageStores, StorageConfig};
use reel_worker::{PipelineConfig, PipelineContext};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    /// Ingest runs in-process against this context
    pub pipeline: Arc<PipelineContext>,
    /// Trigger transport, checked by readiness when present
    pub queue: Option<Arc<TriggerQueue>>,
}

impl AppState {
    /// Create state from environment: object store, trigger queue and tools.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let storage = StorageConfig::from_env()?;
        let store = storage.connect().await?;
        let stores = StageStores::new(store, storage.layout.clone());

        let queue = TriggerQueue::from_env()?;
        queue.init().await?;

        let pipeline = PipelineContext::new(
            stores,
            Arc::new(ProcessRunner::new()),
            Arc::new(queue.clone()),
            PipelineConfig::from_env(),
        )
        .with_instance_id(format!("api-{}", uuid::Uuid::new_v4()));

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            queue: Some(Arc::new(queue)),
        })
    }

    /// State over an existing pipeline context, without a trigger queue.
    pub fn with_pipeline(config: ApiConfig, pipeline: Arc<PipelineContext>) -> Self {
        Self {
            config,
            pipeline,
            queue: None,
        }
    }
}
