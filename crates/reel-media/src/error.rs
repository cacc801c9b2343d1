//! Error types for external tool invocations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running external tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} exited with status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ToolFailed {
        tool: String,
        args: Vec<String>,
        output: String,
        exit_code: Option<i32>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout {
        tool: String,
        args: Vec<String>,
        secs: u64,
        output: String,
    },

    #[error("Unexpected tool output: {0}")]
    UnexpectedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn tool_failed(
        tool: impl Into<String>,
        args: Vec<String>,
        output: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            args,
            output: output.into(),
            exit_code,
        }
    }

    pub fn unexpected_output(message: impl Into<String>) -> Self {
        Self::UnexpectedOutput(message.into())
    }

    /// Captured diagnostics, if the failure came from a tool run.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            MediaError::ToolFailed { output, .. } | MediaError::Timeout { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }
}
