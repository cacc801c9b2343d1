//! Normalize: transcode a quarantine object to the canonical profile.
//!
//! Upload to normalized happens before the quarantine delete, under the same
//! key. A crash in between leaves the source for redelivery, and the rerun
//! overwrites the normalized object instead of duplicating it.

use std::time::Instant;

use reel_models::{ItemKey, StageName, VideoItem};
use reel_storage::StorageError;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::metrics;

const STAGE: &str = "normalize";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Output is in the normalized store
    Normalized {
        item: VideoItem,
        /// False when the quarantine delete was given up on
        source_removed: bool,
    },
    /// The quarantine object was gone: a duplicate trigger for finished work
    AlreadyProcessed,
}

pub async fn normalize(ctx: &PipelineContext, key: &str) -> PipelineResult<NormalizeOutcome> {
    let started = Instant::now();
    let result = run(ctx, key).await;

    let outcome = match &result {
        Ok(NormalizeOutcome::Normalized { .. }) => "normalized",
        Ok(NormalizeOutcome::AlreadyProcessed) => "already_processed",
        Err(e) => e.kind(),
    };
    metrics::record_stage(STAGE, outcome, started.elapsed().as_secs_f64());
    result
}

async fn run(ctx: &PipelineContext, key: &str) -> PipelineResult<NormalizeOutcome> {
    let item_key = ItemKey::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    let logger = StageLogger::new(STAGE, key);
    logger.log_start("transcoding to target profile");

    let scratch = ctx.scratch(STAGE)?;
    let source = scratch.join(format!("source-{}", key));
    let output = scratch.join(key);

    match ctx.stores.get_to_file(StageName::Quarantine, key, &source).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            logger.log_progress("source already consumed, nothing to do");
            return Ok(NormalizeOutcome::AlreadyProcessed);
        }
        Err(e) => return Err(e.into()),
    }

    let tools = &ctx.config.tools;
    let invocation = tools
        .profile
        .command(&source, &output)
        .invocation(&tools.ffmpeg_path, tools.transcode_timeout);
    ctx.runner.run(&invocation).await.map_err(|e| {
        logger.log_error(&format!("transcode failed, source retained: {}", e));
        PipelineError::transcode_failure(key, e)
    })?;

    let size = ctx
        .stores
        .put_file(StageName::Normalized, key, &output)
        .await?;
    logger.log_progress(&format!("uploaded {} bytes to normalized", size));

    let source_removed = ctx
        .delete_best_effort(StageName::Quarantine, key, &logger)
        .await;

    ctx.announce(StageName::Normalized, key, &logger).await;

    logger.log_completion("normalized");

    Ok(NormalizeOutcome::Normalized {
        item: VideoItem::new(item_key, StageName::Normalized, size),
        source_removed,
    })
}
