//! Concatenate: merge a claimed batch into one compilation.
//!
//! Members are deleted from the normalized store only after the
//! compilation is uploaded. Any failure before that leaves every member in
//! place for the next gate evaluation.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use reel_media::{concat_command, write_playlist};
use reel_models::{compilation_name, Compilation, StageName, COMPILATION_PREFIX};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::metrics;
use crate::stages::gate::ClaimedBatch;

const STAGE: &str = "concatenate";

const DEFAULT_EXTENSION: &str = "mp4";

/// Suffixed names tried when the timestamped name is taken.
const MAX_NAME_SUFFIX: u32 = 99;

/// Run one concatenation and release the claim afterwards, whatever the
/// outcome.
pub async fn concatenate(ctx: &PipelineContext, claimed: ClaimedBatch) -> PipelineResult<Compilation> {
    let started = Instant::now();
    let result = run(ctx, &claimed).await;
    claimed.release().await;

    let outcome = match &result {
        Ok(_) => "compiled",
        Err(e) => e.kind(),
    };
    metrics::record_stage(STAGE, outcome, started.elapsed().as_secs_f64());
    result
}

/// `compilation-<ts>.<ext>`, or `compilation-<ts>-<n>.<ext>` if taken.
async fn free_name(ctx: &PipelineContext, at: DateTime<Utc>, ext: &str) -> PipelineResult<String> {
    let name = compilation_name(at, ext);
    if !ctx.stores.exists(StageName::Compilations, &name).await? {
        return Ok(name);
    }

    let stamp = at.format("%Y%m%d%H%M%S");
    for n in 1..=MAX_NAME_SUFFIX {
        let name = format!("{}{}-{}.{}", COMPILATION_PREFIX, stamp, n, ext);
        if !ctx.stores.exists(StageName::Compilations, &name).await? {
            return Ok(name);
        }
    }
    Err(PipelineError::concat_aborted(format!(
        "no free compilation name for {}",
        stamp
    )))
}

async fn run(ctx: &PipelineContext, claimed: &ClaimedBatch) -> PipelineResult<Compilation> {
    let batch = claimed.batch();
    let label = batch.claim_id().unwrap_or("unleased").to_string();
    let logger = StageLogger::new(STAGE, label);

    if batch.is_empty() {
        return Err(PipelineError::concat_aborted("batch has no members"));
    }
    logger.log_start(&format!("merging {} items", batch.len()));

    let scratch = ctx.scratch(STAGE)?;

    let mut inputs: Vec<PathBuf> = Vec::with_capacity(batch.len());
    for (index, key) in batch.members().iter().enumerate() {
        let local = scratch.join(format!("{:04}-{}", index, key));
        match ctx
            .stores
            .get_to_file(StageName::Normalized, key.as_str(), &local)
            .await
        {
            Ok(_) => inputs.push(local),
            Err(e) if e.is_not_found() => {
                logger.log_error(&format!("batch member {} disappeared", key));
                return Err(PipelineError::concat_aborted(format!(
                    "batch member {} is no longer in the normalized store",
                    key
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }
    logger.log_progress(&format!("downloaded {} items", inputs.len()));

    let playlist = write_playlist(scratch.path(), &inputs)
        .await
        .map_err(PipelineError::Scratch)?;

    let ext = batch
        .members()
        .first()
        .and_then(|k| k.extension())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string();
    let output = scratch.join(format!("merged.{}", ext));

    let tools = &ctx.config.tools;
    let invocation = concat_command(&playlist, &output).invocation(&tools.ffmpeg_path, tools.concat_timeout);
    ctx.runner.run(&invocation).await.map_err(|e| {
        logger.log_error(&format!("stream copy failed, batch kept: {}", e));
        PipelineError::concat_failure(e)
    })?;

    let created_at = Utc::now();
    let name = free_name(ctx, created_at, &ext).await?;
    let size = ctx
        .stores
        .put_file(StageName::Compilations, &name, &output)
        .await?;
    logger.log_progress(&format!("uploaded {} ({} bytes)", name, size));

    let mut kept = 0;
    for key in batch.members() {
        if !ctx
            .delete_best_effort(StageName::Normalized, key.as_str(), &logger)
            .await
        {
            kept += 1;
        }
    }
    if kept > 0 {
        logger.log_warning(&format!(
            "{} consumed items could not be deleted and may join a later batch",
            kept
        ));
    }

    ctx.announce(StageName::Compilations, &name, &logger).await;
    logger.log_completion(&format!("{} from {} items", name, batch.len()));

    Ok(Compilation {
        name,
        size_bytes: size,
        member_count: batch.len(),
        created_at,
    })
}
