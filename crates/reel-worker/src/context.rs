//! Shared dependencies of every stage.

use std::sync::Arc;

use reel_media::{ScratchDir, ToolRunner};
use reel_models::StageName;
use reel_publish::Publisher;
use reel_queue::{EventSink, QueueError};
use reel_storage::{LeaseManager, StageStores, StorageError};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::retry::{with_backoff, Backoff};

/// Everything a stage needs: stores, tools, trigger sink, publisher and
/// configuration. Built once per process and shared behind an `Arc`.
pub struct PipelineContext {
    pub stores: StageStores,
    pub runner: Arc<dyn ToolRunner>,
    pub events: Arc<dyn EventSink>,
    pub leases: LeaseManager,
    pub config: PipelineConfig,
    publisher: Option<Arc<dyn Publisher>>,
    instance_id: String,
}

impl PipelineContext {
    pub fn new(
        stores: StageStores,
        runner: Arc<dyn ToolRunner>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        let leases = LeaseManager::new(stores.store().clone(), stores.control_bucket());
        Self {
            stores,
            runner,
            events,
            leases,
            config,
            publisher: None,
            instance_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Identifies this process as a lease holder.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn publisher(&self) -> PipelineResult<&Arc<dyn Publisher>> {
        self.publisher
            .as_ref()
            .ok_or_else(|| PipelineError::config("no publisher configured"))
    }

    /// A fresh scratch directory for one stage run.
    pub fn scratch(&self, prefix: &str) -> PipelineResult<ScratchDir> {
        ScratchDir::new(&self.config.work_dir, prefix).map_err(PipelineError::Scratch)
    }

    /// Emit an object-created trigger. Failures are logged only: the object
    /// already exists and the gate poll or an operator can pick it up.
    pub async fn announce(&self, stage: StageName, key: &str, logger: &StageLogger) {
        let what = format!("announce {} {}", stage, key);
        let result = with_backoff(&Backoff::default(), &what, QueueError::is_retryable, || {
            self.events.object_created(stage, key)
        })
        .await;
        if let Err(e) = result {
            logger.log_warning(&format!("Failed to emit trigger for {} {}: {}", stage, key, e));
        }
    }

    /// Delete with retries; a missing object counts as deleted. Returns
    /// whether the object is gone.
    pub async fn delete_best_effort(
        &self,
        stage: StageName,
        key: &str,
        logger: &StageLogger,
    ) -> bool {
        let what = format!("delete {} {}", stage, key);
        let result = with_backoff(&Backoff::default(), &what, StorageError::is_retryable, || async {
            match self.stores.delete(stage, key).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                logger.log_warning(&format!("Failed to delete {} from {}: {}", key, stage, e));
                crate::metrics::record_cleanup_failure(logger.stage());
                false
            }
        }
    }
}
