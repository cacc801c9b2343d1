//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reel_worker::PipelineError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited")]
    RateLimited,

    /// The downloader could not fetch the source. `output` is the tool's
    /// diagnostics, left out in production.
    #[error("Fetch failed: {message}")]
    FetchFailed {
        message: String,
        output: Option<String>,
    },

    #[error("Ingest timed out after {0}s")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),
}

impl ApiError {
    /// Map an ingest failure, keeping tool output only when `expose_output`.
    pub fn from_pipeline(err: PipelineError, expose_output: bool) -> Self {
        match err {
            PipelineError::InvalidSubmission(msg) => Self::BadRequest(msg),
            PipelineError::FetchFailure { message, output } => Self::FetchFailed {
                message,
                output: expose_output.then_some(output).filter(|o| !o.is_empty()),
            },
            PipelineError::Storage(e) => Self::Storage(e),
            other => Self::Internal(other.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::FetchFailed { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind, also used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_submission",
            ApiError::RateLimited => "rate_limited",
            ApiError::FetchFailed { .. } => "fetch_failure",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal",
            ApiError::Storage(_) => "io_failure",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = Some(self.code().to_string());

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) | ApiError::Storage(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            ApiError::FetchFailed {
                output: Some(output),
                ..
            } => format!("{}\n{}", self, output),
            _ => self.to_string(),
        };

        let body = ErrorResponse { detail, code };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media::MediaError;

    fn fetch_error() -> PipelineError {
        PipelineError::fetch_failure(MediaError::tool_failed(
            "yt-dlp",
            vec!["https://example.com/v".to_string()],
            "ERROR: Unsupported URL",
            Some(1),
        ))
    }

    #[test]
    fn test_status_mapping() {
        let invalid = ApiError::from_pipeline(PipelineError::invalid_submission("bad url"), true);
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let fetch = ApiError::from_pipeline(fetch_error(), true);
        assert_eq!(fetch.status_code(), StatusCode::BAD_GATEWAY);

        let storage = ApiError::from_pipeline(
            PipelineError::Storage(reel_storage::StorageError::upload_failed("boom")),
            true,
        );
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Timeout(5).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_fetch_output_only_when_exposed() {
        match ApiError::from_pipeline(fetch_error(), true) {
            ApiError::FetchFailed { output, .. } => {
                assert!(output.unwrap().contains("Unsupported URL"))
            }
            other => panic!("unexpected {other:?}"),
        }
        match ApiError::from_pipeline(fetch_error(), false) {
            ApiError::FetchFailed { output, .. } => assert!(output.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
