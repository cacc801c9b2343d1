//! Submission server settings.

use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// `*` allows any origin
    pub cors_origins: Vec<String>,
    /// Sustained submissions per second allowed from one client address
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    /// A submission holds its request open for fetch and upload; past this
    /// the client gets `504` while the ingest is dropped.
    pub ingest_timeout: Duration,
    pub max_body_size: usize,
    /// `production` hides internal error details and tool output
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            ingest_timeout: Duration::from_secs(900),
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => d.cors_origins,
        };

        Self {
            host: env_or("API_HOST", d.host),
            port: env_or("API_PORT", d.port),
            cors_origins,
            rate_limit_rps: env_or("RATE_LIMIT_RPS", d.rate_limit_rps),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", d.rate_limit_burst),
            ingest_timeout: Duration::from_secs(env_or(
                "INGEST_TIMEOUT_SECS",
                d.ingest_timeout.as_secs(),
            )),
            max_body_size: env_or("MAX_BODY_SIZE", d.max_body_size),
            environment: env_or("ENVIRONMENT", d.environment),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_flag() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());
        config.environment = "Production".to_string();
        assert!(config.is_production());
    }

    #[test]
    fn test_unset_value_keeps_default() {
        assert_eq!(env_or("REEL_API_TEST_UNSET_PORT", 8000u16), 8000);
    }
}
