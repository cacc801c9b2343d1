//! Publish: hand a compilation to the hosting service.
//!
//! A `published-<name>.json` marker in the control bucket records each
//! publish, so a redelivered trigger does not upload twice.

use std::time::Instant;

use chrono::{DateTime, Utc};
use reel_models::StageName;
use reel_publish::PublishReceipt;
use reel_storage::StorageError;
use serde::{Deserialize, Serialize};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::metrics;
use crate::retry::{with_backoff, Backoff};

const STAGE: &str = "publish";

/// Persisted record of a finished publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMarker {
    pub name: String,
    pub publish_id: String,
    pub published_at: DateTime<Utc>,
}

pub fn marker_key(name: &str) -> String {
    format!("published-{}.json", name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        receipt: PublishReceipt,
        archived: bool,
        removed: bool,
    },
    /// A marker shows this compilation was already published
    AlreadyPublished { publish_id: String },
}

pub async fn publish(ctx: &PipelineContext, name: &str) -> PipelineResult<PublishOutcome> {
    let started = Instant::now();
    let result = run(ctx, name).await;

    let outcome = match &result {
        Ok(PublishOutcome::Published { .. }) => "published",
        Ok(PublishOutcome::AlreadyPublished { .. }) => "already_published",
        Err(e) => e.kind(),
    };
    metrics::record_stage(STAGE, outcome, started.elapsed().as_secs_f64());
    result
}

async fn existing_marker(ctx: &PipelineContext, name: &str) -> PipelineResult<Option<String>> {
    let store = ctx.stores.store();
    match store.get(ctx.stores.control_bucket(), &marker_key(name)).await {
        Ok(bytes) => Ok(Some(
            serde_json::from_slice::<PublishMarker>(&bytes)
                .map(|m| m.publish_id)
                .unwrap_or_else(|_| "unknown".to_string()),
        )),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn run(ctx: &PipelineContext, name: &str) -> PipelineResult<PublishOutcome> {
    reel_storage::validate_key(name)?;
    let logger = StageLogger::new(STAGE, name);

    if let Some(publish_id) = existing_marker(ctx, name).await? {
        logger.log_progress(&format!("already published as {}", publish_id));
        return Ok(PublishOutcome::AlreadyPublished { publish_id });
    }

    let publisher = ctx.publisher()?;
    logger.log_start("downloading compilation");

    let scratch = ctx.scratch(STAGE)?;
    let local = scratch.join(name);
    match ctx
        .stores
        .get_to_file(StageName::Compilations, name, &local)
        .await
    {
        Ok(_) => {}
        Err(e) if e.is_not_found() => return Err(PipelineError::not_found(name)),
        Err(e) => return Err(e.into()),
    }

    let config = &ctx.config.publish;
    let metadata = config.metadata.render(name, Utc::now());
    let receipt = publisher.publish(&local, &metadata).await.map_err(|e| {
        logger.log_error(&format!("publish failed: {}", e));
        PipelineError::PublishFailure(e)
    })?;
    logger.log_progress(&format!("published as {}", receipt.id));

    let marker = PublishMarker {
        name: name.to_string(),
        publish_id: receipt.id.clone(),
        published_at: receipt.published_at,
    };
    let body = serde_json::to_vec(&marker).map_err(StorageError::from)?;
    let key = marker_key(name);
    let what = format!("write publish marker {}", name);
    let marker_written = with_backoff(&Backoff::default(), &what, StorageError::is_retryable, || {
        ctx.stores
            .store()
            .put(ctx.stores.control_bucket(), &key, body.clone())
    })
    .await;
    if let Err(e) = marker_written {
        logger.log_warning(&format!("publish marker not written, a redelivery may publish again: {}", e));
    }

    // Archive before any delete; without a copy the compilation stays put
    let archived = if ctx.stores.has_stage(StageName::Archive) {
        let what = format!("archive {}", name);
        match with_backoff(&Backoff::default(), &what, StorageError::is_retryable, || {
            ctx.stores.put_file(StageName::Archive, name, &local)
        })
        .await
        {
            Ok(_) => true,
            Err(e) => {
                logger.log_warning(&format!("archive copy failed: {}", e));
                metrics::record_cleanup_failure(STAGE);
                false
            }
        }
    } else {
        false
    };

    let safe_to_delete = archived || !ctx.stores.has_stage(StageName::Archive);
    let removed = if config.delete_after && safe_to_delete {
        ctx.delete_best_effort(StageName::Compilations, name, &logger)
            .await
    } else {
        false
    };

    logger.log_completion(&format!(
        "{} (archived: {}, removed: {})",
        receipt.id, archived, removed
    ));

    Ok(PublishOutcome::Published {
        receipt,
        archived,
        removed,
    })
}
