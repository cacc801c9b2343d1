//! Trigger events.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::StageName;

/// Notification that a stage store gained an object.
///
/// Delivered at least once, possibly duplicated, with no ordering across keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectCreated {
    pub event_id: String,
    pub stage: StageName,
    pub key: String,
    pub emitted_at: DateTime<Utc>,
}

impl ObjectCreated {
    pub fn new(stage: StageName, key: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            stage,
            key: key.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Key used to suppress duplicate enqueues of the same object.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.stage, self.key)
    }
}
