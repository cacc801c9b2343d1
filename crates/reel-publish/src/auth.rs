//! OAuth tokens for the publish API.
//!
//! Google credentials are resolved by `gcp_auth` (service account file,
//! metadata server, or gcloud). Tokens are cached and refreshed ahead of
//! expiry with a single-flight refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{PublishError, PublishResult};

/// Refresh margin: refresh token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Conservative token TTL when expiry is unknown.
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for uploading videos.
pub const YOUTUBE_UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Clone)]
enum Source {
    Static(String),
    Google {
        provider: Arc<dyn TokenProvider>,
        cache: Arc<RwLock<Option<CachedToken>>>,
    },
}

/// Where bearer tokens come from.
#[derive(Clone)]
pub struct TokenSource {
    source: Source,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Source::Static(_) => f.write_str("TokenSource::Static(..)"),
            Source::Google { .. } => f.write_str("TokenSource::Google"),
        }
    }
}

impl TokenSource {
    /// A fixed token, e.g. minted by an external refresher.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    pub fn google(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            source: Source::Google {
                provider,
                cache: Arc::new(RwLock::new(None)),
            },
        }
    }

    /// `PUBLISH_ACCESS_TOKEN` if set, otherwise Google application default credentials.
    pub async fn from_env() -> PublishResult<Self> {
        if let Ok(token) = std::env::var("PUBLISH_ACCESS_TOKEN") {
            if !token.is_empty() {
                return Ok(Self::fixed(token));
            }
        }

        let provider = gcp_auth::provider()
            .await
            .map_err(|e| PublishError::auth(format!("No Google credentials available: {}", e)))?;
        Ok(Self::google(provider))
    }

    /// A bearer token valid for at least the refresh margin.
    pub async fn token(&self) -> PublishResult<String> {
        let (provider, cache) = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::Google { provider, cache } => (provider, cache),
        };

        {
            let cached = cache.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut cached = cache.write().await;
        // Another task may have refreshed while we waited
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.access_token.clone());
        }

        match provider.token(&[YOUTUBE_UPLOAD_SCOPE]).await {
            Ok(token) => {
                let now = Utc::now();
                let exp = token.expires_at();
                let expires_at = if exp > now {
                    (exp - now)
                        .to_std()
                        .map(|ttl| Instant::now() + ttl)
                        .unwrap_or_else(|_| Instant::now() + TOKEN_DEFAULT_TTL)
                } else {
                    Instant::now()
                };

                let access_token = token.as_str().to_string();
                *cached = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });
                debug!("Refreshed publish auth token");
                Ok(access_token)
            }
            Err(e) => {
                if let Some(token) = cached.as_ref().filter(|t| t.is_usable()) {
                    warn!("Token refresh failed, using existing token: {}", e);
                    return Ok(token.access_token.clone());
                }
                Err(PublishError::auth(format!("Failed to obtain auth token: {}", e)))
            }
        }
    }

    /// Drop a cached token the API rejected.
    pub async fn invalidate(&self) {
        if let Source::Google { cache, .. } = &self.source {
            *cache.write().await = None;
        }
    }
}
