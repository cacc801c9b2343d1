//! Pipeline error types.

use reel_media::MediaError;
use reel_publish::PublishError;
use reel_queue::QueueError;
use reel_storage::StorageError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Fetch failed: {message}")]
    FetchFailure { message: String, output: String },

    #[error("Transcode of {key} failed: {message}")]
    TranscodeFailure {
        key: String,
        message: String,
        output: String,
    },

    #[error("Concatenation failed: {message}")]
    ConcatFailure { message: String, output: String },

    #[error("Publish failed: {0}")]
    PublishFailure(#[from] PublishError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scratch directory error: {0}")]
    Scratch(#[source] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid_submission(msg: impl Into<String>) -> Self {
        Self::InvalidSubmission(msg.into())
    }

    pub fn fetch_failure(err: MediaError) -> Self {
        Self::FetchFailure {
            output: err.tool_output().unwrap_or_default().to_string(),
            message: err.to_string(),
        }
    }

    pub fn transcode_failure(key: impl Into<String>, err: MediaError) -> Self {
        Self::TranscodeFailure {
            key: key.into(),
            output: err.tool_output().unwrap_or_default().to_string(),
            message: err.to_string(),
        }
    }

    pub fn concat_failure(err: MediaError) -> Self {
        Self::ConcatFailure {
            output: err.tool_output().unwrap_or_default().to_string(),
            message: err.to_string(),
        }
    }

    /// A concatenation failure that did not come from the tool.
    pub fn concat_aborted(msg: impl Into<String>) -> Self {
        Self::ConcatFailure {
            message: msg.into(),
            output: String::new(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Tool diagnostics attached to the failure, if any.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            PipelineError::FetchFailure { output, .. }
            | PipelineError::TranscodeFailure { output, .. }
            | PipelineError::ConcatFailure { output, .. } => {
                Some(output.as_str()).filter(|o| !o.is_empty())
            }
            _ => None,
        }
    }

    /// Short kind name for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidSubmission(_) => "invalid_submission",
            PipelineError::FetchFailure { .. } => "fetch_failure",
            PipelineError::TranscodeFailure { .. } => "transcode_failure",
            PipelineError::ConcatFailure { .. } => "concat_failure",
            PipelineError::PublishFailure(_) => "publish_failure",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Config(_) => "config",
            PipelineError::Scratch(_) | PipelineError::Io(_) => "io",
            PipelineError::Storage(_) => "io_failure",
            PipelineError::Queue(_) => "queue",
        }
    }

    /// Whether redelivering the trigger can succeed.
    ///
    /// Transcode and concatenation failures keep their inputs upstream, so a
    /// later attempt may pass. Fetch failures are reported to the submitter
    /// instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::TranscodeFailure { .. }
            | PipelineError::ConcatFailure { .. }
            | PipelineError::Scratch(_)
            | PipelineError::Io(_) => true,
            PipelineError::Queue(e) => e.is_retryable(),
            PipelineError::Storage(e) => e.is_retryable(),
            PipelineError::PublishFailure(e) => e.is_retryable(),
            PipelineError::InvalidSubmission(_)
            | PipelineError::FetchFailure { .. }
            | PipelineError::NotFound(_)
            | PipelineError::Config(_) => false,
        }
    }
}
