//! YouTube Data API upload client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::error::{PublishError, PublishResult};
use crate::metadata::{PublishMetadata, PublishReceipt};

/// Hands a finished compilation to the hosting service.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload the file at `path` with the given metadata.
    async fn publish(&self, path: &Path, metadata: &PublishMetadata) -> PublishResult<PublishReceipt>;
}

/// Configuration for the YouTube client.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    /// API origin; overridden in tests
    pub api_base: String,
    /// Whole-request timeout, upload included
    pub timeout: Duration,
    /// Transport-level retries for transient failures
    pub max_retries: u32,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com".to_string(),
            timeout: Duration::from_secs(3600),
            max_retries: 0,
        }
    }
}

impl YouTubeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("PUBLISH_API_BASE")
                .unwrap_or_else(|_| "https://www.googleapis.com".to_string()),
            timeout: Duration::from_secs(
                std::env::var("PUBLISH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            max_retries: std::env::var("PUBLISH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

/// Resumable-upload client for `videos.insert`.
pub struct YouTubePublisher {
    http: Client,
    config: YouTubeConfig,
    tokens: TokenSource,
}

impl YouTubePublisher {
    pub fn new(config: YouTubeConfig, tokens: TokenSource) -> PublishResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("reel-publish/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PublishError::Network)?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    pub async fn from_env() -> PublishResult<Self> {
        Self::new(YouTubeConfig::from_env(), TokenSource::from_env().await?)
    }

    async fn check(&self, response: Response) -> PublishResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(PublishError::RequestFailed {
            status: status.as_u16(),
            body,
        })
    }

    /// Open an upload session and return its URL.
    async fn start_session(&self, metadata: &PublishMetadata, len: u64) -> PublishResult<String> {
        let url = format!(
            "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
            self.config.api_base
        );
        let token = self.tokens.token().await?;

        debug!("Opening upload session at {}", url);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", len.to_string())
            .json(&metadata.to_video_resource())
            .send()
            .await?;
        let response = self.check(response).await?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::invalid_response("upload session has no Location header"))
    }

    async fn upload(&self, session_url: &str, path: &Path, len: u64) -> PublishResult<String> {
        let token = self.tokens.token().await?;
        let file = tokio::fs::File::open(path).await?;

        let response = self
            .http
            .put(session_url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "video/*")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        let response = self.check(response).await?;

        let video: VideoResource = response
            .json()
            .await
            .map_err(|e| PublishError::invalid_response(e.to_string()))?;
        Ok(video.id)
    }

    async fn publish_once(&self, path: &Path, metadata: &PublishMetadata) -> PublishResult<String> {
        let len = tokio::fs::metadata(path).await?.len();
        let session = self.start_session(metadata, len).await?;
        self.upload(&session, path, len).await
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    async fn publish(&self, path: &Path, metadata: &PublishMetadata) -> PublishResult<PublishReceipt> {
        let mut attempt = 0;
        let id = loop {
            match self.publish_once(path, metadata).await {
                Ok(id) => break id,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Publish failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        info!(video_id = %id, title = %metadata.title, "Published {}", path.display());
        Ok(PublishReceipt {
            id,
            published_at: Utc::now(),
        })
    }
}
