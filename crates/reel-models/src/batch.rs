//! Batches and compilations.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::item::ItemKey;

/// Name prefix of every compilation object.
pub const COMPILATION_PREFIX: &str = "compilation-";

/// Timestamp-derived compilation name: `compilation-<YYYYMMDDHHmmss>.<ext>`.
pub fn compilation_name(at: DateTime<Utc>, ext: &str) -> String {
    format!("{}{}.{}", COMPILATION_PREFIX, at.format("%Y%m%d%H%M%S"), ext)
}

/// An ordered, immutable snapshot of normalized items claimed for one
/// concatenation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Batch {
    members: Vec<ItemKey>,
    claimed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_id: Option<String>,
}

impl Batch {
    pub fn new(members: Vec<ItemKey>, claimed_at: DateTime<Utc>) -> Self {
        Self {
            members,
            claimed_at,
            claim_id: None,
        }
    }

    /// Attach the id of the lease that reserves these members.
    pub fn with_claim_id(mut self, claim_id: impl Into<String>) -> Self {
        self.claim_id = Some(claim_id.into());
        self
    }

    pub fn members(&self) -> &[ItemKey] {
        &self.members
    }

    pub fn claimed_at(&self) -> DateTime<Utc> {
        self.claimed_at
    }

    pub fn claim_id(&self) -> Option<&str> {
        self.claim_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Output artifact of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Compilation {
    /// Unique, timestamp-derived object name
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Number of batch members merged into it
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compilation_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(compilation_name(at, "mp4"), "compilation-20240309070501.mp4");
    }

    #[test]
    fn test_batch_preserves_order() {
        let members = vec![
            ItemKey::parse("b.mp4").unwrap(),
            ItemKey::parse("a.mp4").unwrap(),
        ];
        let batch = Batch::new(members.clone(), Utc::now()).with_claim_id("lease-1");
        assert_eq!(batch.members(), members.as_slice());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.claim_id(), Some("lease-1"));
    }
}
