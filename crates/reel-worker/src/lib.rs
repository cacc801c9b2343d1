//! Storage-triggered video pipeline.
//!
//! This crate provides:
//! - The pipeline stages: ingest, normalize, batch-ready gate, concatenate, publish
//! - A dispatcher routing object-created triggers to stages
//! - Crash-safe ordering: every delete follows the upload it makes redundant
//! - Graceful shutdown

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod source_url;
pub mod stages;

pub use config::{GateConfig, PipelineConfig, PublishConfig, ToolConfig};
pub use context::PipelineContext;
pub use dispatcher::{handle_event, run_gate_cycle, Dispatcher, GatePoller, Handled};
pub use error::{PipelineError, PipelineResult};
pub use logging::{init_tracing, StageLogger};
pub use source_url::{validate_source_url, UrlRejection};
pub use stages::{
    concatenate, evaluate_gate, ingest, normalize, publish, ClaimedBatch, GateOutcome,
    IngestOutcome, NormalizeOutcome, PublishOutcome,
};
