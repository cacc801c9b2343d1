//! Liveness and readiness probes.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// `GET /health`: the process is up.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Outcome of reaching one dependency.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Probe {
    Ok { latency_ms: u64 },
    Error { error: String },
}

impl Probe {
    async fn run<E: std::fmt::Display>(check: impl Future<Output = Result<(), E>>) -> Self {
        let start = Instant::now();
        Self::from_outcome(check.await, start)
    }

    fn from_outcome<E: std::fmt::Display>(outcome: Result<(), E>, start: Instant) -> Self {
        match outcome {
            Ok(()) => Probe::Ok {
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => Probe::Error {
                error: e.to_string(),
            },
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Probe::Ok { .. })
    }
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    /// `ready` or `degraded`
    pub status: &'static str,
    /// One entry per stage and control bucket
    pub buckets: BTreeMap<String, Probe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<Probe>,
}

/// `GET /ready`: every bucket answers and, when triggers go through Redis,
/// the queue does too. `503` otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let start = Instant::now();
    let buckets: BTreeMap<String, Probe> = state
        .pipeline
        .stores
        .probe()
        .await
        .into_iter()
        .map(|(bucket, outcome)| (bucket, Probe::from_outcome(outcome, start)))
        .collect();

    let queue = match &state.queue {
        Some(queue) => Some(Probe::run(queue.ping()).await),
        None => None,
    };

    let ready = buckets.values().all(Probe::is_ok) && queue.as_ref().map_or(true, Probe::is_ok);
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            buckets,
            queue,
        }),
    )
}
