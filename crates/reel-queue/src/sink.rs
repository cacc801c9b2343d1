//! Where stages announce newly created objects.

use async_trait::async_trait;
use reel_models::StageName;
use tracing::debug;

use crate::error::QueueResult;
use crate::queue::{Enqueued, TriggerQueue};

/// Receives "object created" notifications from stages.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn object_created(&self, stage: StageName, key: &str) -> QueueResult<()>;
}

#[async_trait]
impl EventSink for TriggerQueue {
    async fn object_created(&self, stage: StageName, key: &str) -> QueueResult<()> {
        match self.publish_created(stage, key).await? {
            Enqueued::Published { .. } | Enqueued::Duplicate => Ok(()),
        }
    }
}

/// Discards notifications. For deployments where the object store itself
/// emits the triggers.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn object_created(&self, stage: StageName, key: &str) -> QueueResult<()> {
        debug!(stage = %stage, key, "Trigger left to store notifications");
        Ok(())
    }
}
