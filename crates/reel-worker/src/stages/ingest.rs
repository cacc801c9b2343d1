//! Ingest: fetch a submitted URL into the quarantine store.

use std::time::Instant;

use reel_media::{locate_fetched, FetchCommand};
use reel_models::{ItemKey, StageName, Submission, VideoItem};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::metrics;
use crate::source_url::validate_source_url;

const STAGE: &str = "ingest";

/// What a successful ingest did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Uploaded to quarantine; a trigger was emitted
    Queued(VideoItem),
    /// The same content is already in quarantine or normalized
    AlreadyPresent(VideoItem),
}

impl IngestOutcome {
    pub fn item(&self) -> &VideoItem {
        match self {
            IngestOutcome::Queued(item) | IngestOutcome::AlreadyPresent(item) => item,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, IngestOutcome::Queued(_))
    }
}

/// Fetch the submission and place it in quarantine, deduplicating by the
/// origin-derived key. Failures are terminal for the submission.
pub async fn ingest(ctx: &PipelineContext, submission: &Submission) -> PipelineResult<IngestOutcome> {
    let started = Instant::now();
    let result = run(ctx, submission).await;

    let outcome = match &result {
        Ok(IngestOutcome::Queued(_)) => "queued",
        Ok(IngestOutcome::AlreadyPresent(_)) => "already_present",
        Err(e) => e.kind(),
    };
    metrics::record_stage(STAGE, outcome, started.elapsed().as_secs_f64());
    result
}

async fn run(ctx: &PipelineContext, submission: &Submission) -> PipelineResult<IngestOutcome> {
    let url = validate_source_url(&submission.url)
        .map_err(|e| PipelineError::invalid_submission(e.to_string()))?;
    let logger = StageLogger::new(STAGE, url.as_str());
    logger.log_start("fetching source");

    let tools = &ctx.config.tools;
    let scratch = ctx.scratch(STAGE)?;

    let invocation = FetchCommand::new(&url, scratch.path())
        .extra_args(tools.fetch_extra_args.iter().cloned())
        .invocation(&tools.ytdlp_path, tools.fetch_timeout);
    ctx.runner.run(&invocation).await.map_err(|e| {
        logger.log_error(&format!("fetch failed: {}", e));
        PipelineError::fetch_failure(e)
    })?;

    let fetched = locate_fetched(scratch.path())
        .await
        .map_err(PipelineError::fetch_failure)?;
    let name = fetched
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let key = ItemKey::parse(name.as_str()).map_err(|e| PipelineError::FetchFailure {
        message: format!("fetched file name '{}' is not a usable key: {}", name, e),
        output: String::new(),
    })?;

    for stage in [StageName::Quarantine, StageName::Normalized] {
        if ctx.stores.exists(stage, key.as_str()).await? {
            let info = ctx.stores.head(stage, key.as_str()).await?;
            let mut item = VideoItem::new(key.clone(), stage, info.size).with_source_url(&url);
            if let Some(at) = info.last_modified {
                item = item.with_created_at(at);
            }
            logger.log_completion(&format!("{} already present in {}", key, stage));
            return Ok(IngestOutcome::AlreadyPresent(item));
        }
    }

    let size = ctx
        .stores
        .put_file(StageName::Quarantine, key.as_str(), &fetched)
        .await?;
    let item = VideoItem::new(key.clone(), StageName::Quarantine, size).with_source_url(&url);

    ctx.announce(StageName::Quarantine, key.as_str(), &logger).await;
    logger.log_completion(&format!("queued {} ({} bytes)", key, size));

    Ok(IngestOutcome::Queued(item))
}
