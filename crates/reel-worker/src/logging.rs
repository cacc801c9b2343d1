//! Structured stage logging.
//!
//! Every stage run logs with the same `stage` and `key` fields so one item
//! can be followed across the pipeline.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber for a binary.
///
/// `RUST_LOG` wins over `defaults`; `LOG_FORMAT=json` switches to one JSON
/// object per line.
pub fn init_tracing(defaults: &[&str]) {
    let mut filter = EnvFilter::from_default_env();
    for directive in defaults {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Logger for one stage run on one key.
#[derive(Debug, Clone)]
pub struct StageLogger {
    stage: &'static str,
    key: String,
}

impl StageLogger {
    /// `stage` is the operation name (e.g. "normalize"), `key` the item,
    /// batch or compilation it works on.
    pub fn new(stage: &'static str, key: impl Into<String>) -> Self {
        Self {
            stage,
            key: key.into(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(stage = self.stage, key = %self.key, "Stage started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(stage = self.stage, key = %self.key, "Stage progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(stage = self.stage, key = %self.key, "Stage warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(stage = self.stage, key = %self.key, "Stage error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(stage = self.stage, key = %self.key, "Stage completed: {}", message);
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!("stage", stage = self.stage, key = %self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_logger_fields() {
        let logger = StageLogger::new("normalize", "youtube-abc.mp4");
        assert_eq!(logger.stage(), "normalize");
        assert_eq!(logger.key(), "youtube-abc.mp4");
    }
}
