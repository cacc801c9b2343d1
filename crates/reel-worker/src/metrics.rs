//! Prometheus metrics for pipeline stages.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{PipelineError, PipelineResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_RUNS_TOTAL: &str = "reel_stage_runs_total";
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";
    pub const BATCH_MEMBERS: &str = "reel_batch_members";
    pub const CLEANUP_FAILURES_TOTAL: &str = "reel_cleanup_failures_total";
    pub const TRIGGERS_TOTAL: &str = "reel_triggers_total";
}

/// Serve `/metrics` on `addr` from a background task.
pub fn init_metrics(addr: SocketAddr) -> PipelineResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::config(format!("Failed to install Prometheus exporter: {}", e)))
}

/// Record one stage run and how it ended (`queued`, `insufficient`, an error kind...).
pub fn record_stage(stage: &'static str, outcome: &'static str, duration_secs: f64) {
    counter!(names::STAGE_RUNS_TOTAL, "stage" => stage, "outcome" => outcome).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage).record(duration_secs);
}

pub fn record_batch_size(members: usize) {
    histogram!(names::BATCH_MEMBERS).record(members as f64);
}

/// A best-effort delete that was given up on.
pub fn record_cleanup_failure(stage: &'static str) {
    counter!(names::CLEANUP_FAILURES_TOTAL, "stage" => stage).increment(1);
}

/// Trigger disposition: `acked`, `pending` or `dead_lettered`.
pub fn record_trigger(source: &'static str, disposition: &'static str) {
    counter!(names::TRIGGERS_TOTAL, "stage" => source, "disposition" => disposition).increment(1);
}
