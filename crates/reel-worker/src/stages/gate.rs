//! Batch-Ready Gate: decide whether enough normalized items exist and claim
//! them for one concatenation run.
//!
//! With the claim lease enabled the gate is single-winner: the lease is
//! taken before the listing that becomes the batch, so concurrent
//! evaluations either see `AlreadyClaimed` or run after the holder is done.
//! Without it, two evaluations may both claim the same members; the second
//! concatenation then fails on a missing member or yields one extra
//! compilation, never corruption.

use std::time::Instant;

use chrono::{DateTime, Utc};
use reel_models::{Batch, ItemKey, StageName};
use reel_storage::{Claim, Lease, ObjectInfo};
use tracing::{debug, warn};

use crate::config::GateConfig;
use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::logging::StageLogger;
use crate::metrics;

const STAGE: &str = "gate";

/// A batch reserved for one concatenation, with the lease that reserves it.
#[derive(Debug)]
pub struct ClaimedBatch {
    batch: Batch,
    lease: Option<Lease>,
}

impl ClaimedBatch {
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Give up the claim. Errors are logged; an unreleased lease expires.
    pub async fn release(&self) {
        if let Some(lease) = &self.lease {
            release_lease(lease).await;
        }
    }
}

async fn release_lease(lease: &Lease) {
    if let Err(e) = lease.release().await {
        warn!(lease_id = lease.id(), "Failed to release batch lease: {}", e);
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    /// Not an error: the store does not hold enough items yet
    Insufficient { found: usize, required: usize },
    /// Another evaluation holds the claim
    AlreadyClaimed {
        holder: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Claimed(ClaimedBatch),
}

impl GateOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, GateOutcome::Claimed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            GateOutcome::Insufficient { .. } => "insufficient",
            GateOutcome::AlreadyClaimed { .. } => "already_claimed",
            GateOutcome::Claimed(_) => "claimed",
        }
    }
}

/// Valid keys ordered oldest first, then by key.
fn candidates(objects: Vec<ObjectInfo>) -> Vec<ItemKey> {
    let mut objects: Vec<(Option<DateTime<Utc>>, ItemKey)> = objects
        .into_iter()
        .filter_map(|info| match ItemKey::parse(info.key.as_str()) {
            Ok(key) => Some((info.last_modified, key)),
            Err(e) => {
                warn!(key = %info.key, "Ignoring unusable key in normalized store: {}", e);
                None
            }
        })
        .collect();
    objects.sort();
    objects.into_iter().map(|(_, key)| key).collect()
}

fn snapshot(config: &GateConfig, mut keys: Vec<ItemKey>) -> Vec<ItemKey> {
    if let Some(max) = config.max_batch_size {
        keys.truncate(max.max(config.min_batch_size));
    }
    keys
}

/// Evaluate the gate once. Mutates nothing unless a batch is claimed.
pub async fn evaluate_gate(ctx: &PipelineContext) -> PipelineResult<GateOutcome> {
    let started = Instant::now();
    let result = run(ctx).await;

    let outcome = match &result {
        Ok(outcome) => outcome.label(),
        Err(e) => e.kind(),
    };
    metrics::record_stage(STAGE, outcome, started.elapsed().as_secs_f64());
    result
}

async fn run(ctx: &PipelineContext) -> PipelineResult<GateOutcome> {
    let config = &ctx.config.gate;
    let required = config.min_batch_size;

    let keys = candidates(ctx.stores.list(StageName::Normalized).await?);
    if keys.len() < required {
        debug!(found = keys.len(), required, "Batch not ready");
        return Ok(GateOutcome::Insufficient {
            found: keys.len(),
            required,
        });
    }

    let logger = StageLogger::new(STAGE, config.lease_name.as_str());

    if !config.use_claim_lease {
        let members = snapshot(config, keys);
        logger.log_completion(&format!("claimed {} items without lease", members.len()));
        metrics::record_batch_size(members.len());
        return Ok(GateOutcome::Claimed(ClaimedBatch {
            batch: Batch::new(members, Utc::now()),
            lease: None,
        }));
    }

    let mut lease = match ctx
        .leases
        .acquire(&config.lease_name, ctx.instance_id(), config.lease_ttl)
        .await?
    {
        Claim::Claimed(lease) => lease,
        Claim::AlreadyClaimed { holder, expires_at } => {
            logger.log_progress(&format!("batch already claimed by {}", holder));
            return Ok(GateOutcome::AlreadyClaimed { holder, expires_at });
        }
    };

    // The listing taken under the lease is the batch
    let keys = match ctx.stores.list(StageName::Normalized).await {
        Ok(objects) => candidates(objects),
        Err(e) => {
            release_lease(&lease).await;
            return Err(e.into());
        }
    };

    if keys.len() < required {
        logger.log_progress("items consumed by the previous holder, releasing claim");
        release_lease(&lease).await;
        return Ok(GateOutcome::Insufficient {
            found: keys.len(),
            required,
        });
    }

    let members = snapshot(config, keys);
    if let Err(e) = lease
        .record_members(members.iter().map(|k| k.to_string()).collect())
        .await
    {
        logger.log_warning(&format!("failed to record batch members in lease: {}", e));
    }

    logger.log_completion(&format!("claimed {} items under lease {}", members.len(), lease.id()));
    metrics::record_batch_size(members.len());

    Ok(GateOutcome::Claimed(ClaimedBatch {
        batch: Batch::new(members, Utc::now()).with_claim_id(lease.id()),
        lease: Some(lease),
    }))
}
