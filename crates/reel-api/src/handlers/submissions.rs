//! Submission handler: runs Ingest synchronously for one source URL.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use reel_models::{StageName, Submission};
use reel_worker::{ingest, IngestOutcome};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Response body for a stored submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// `queued` or `already_present`
    pub status: &'static str,
    pub key: String,
    pub stage: StageName,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Echoed from the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_target: Option<serde_json::Value>,
}

/// `POST /api/submissions`
///
/// `202` when the item was queued, `200` when it was already in the pipeline.
pub async fn create_submission(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> ApiResult<(StatusCode, Json<SubmissionResponse>)> {
    let timeout = state.config.ingest_timeout;
    let result = tokio::time::timeout(timeout, ingest(&state.pipeline, &submission)).await;

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(url = %submission.url, "Submission failed: {}", e);
            let err = ApiError::from_pipeline(e, !state.config.is_production());
            metrics::record_submission(err.code());
            return Err(err);
        }
        Err(_) => {
            warn!(url = %submission.url, "Submission timed out after {:?}", timeout);
            metrics::record_submission("timeout");
            return Err(ApiError::Timeout(timeout.as_secs()));
        }
    };

    let (status_code, status) = match &outcome {
        IngestOutcome::Queued(_) => (StatusCode::ACCEPTED, "queued"),
        IngestOutcome::AlreadyPresent(_) => (StatusCode::OK, "already_present"),
    };
    metrics::record_submission(status);

    let item = outcome.item();
    info!(key = %item.key, stage = %item.stage, "Submission {}", status);

    Ok((
        status_code,
        Json(SubmissionResponse {
            status,
            key: item.key.to_string(),
            stage: item.stage,
            size_bytes: item.size_bytes,
            created_at: item.created_at,
            reply_target: submission.reply_target,
        }),
    ))
}
