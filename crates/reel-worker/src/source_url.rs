//! Validation of submitted source URLs.
//!
//! The fetch tool will follow whatever URL it is given, so internal
//! addresses and cloud metadata endpoints are refused before it runs.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

/// Maximum URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Hosts that must never be fetched.
static BLOCKED_HOSTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^127\.",
        r"^localhost$",
        r"\.localhost$",
        r"^0\.",
        r"^10\.",
        r"^172\.(1[6-9]|2[0-9]|3[0-1])\.",
        r"^192\.168\.",
        r"^169\.254\.",
        r"^\[::1?\]$",
        r"^\[f[cd]",
        r"^\[fe80",
        r"^metadata\.",
        r"\.internal$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    Empty,
    TooLong,
    Malformed(String),
    UnsupportedScheme(String),
    MissingHost,
    Blocked(String),
}

impl std::fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "URL cannot be empty"),
            Self::TooLong => write!(f, "URL exceeds maximum length of {} characters", MAX_URL_LENGTH),
            Self::Malformed(e) => write!(f, "Invalid URL format: {}", e),
            Self::UnsupportedScheme(s) => {
                write!(f, "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.", s)
            }
            Self::MissingHost => write!(f, "URL must have a valid host"),
            Self::Blocked(host) => {
                write!(f, "URL targets an internal or restricted endpoint: {}", host)
            }
        }
    }
}

/// Check a submitted URL and return it trimmed.
pub fn validate_source_url(url: &str) -> Result<String, UrlRejection> {
    let url = url.trim();
    if url.is_empty() {
        return Err(UrlRejection::Empty);
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(UrlRejection::TooLong);
    }

    let parsed = Url::parse(url).map_err(|e| UrlRejection::Malformed(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlRejection::UnsupportedScheme(scheme.to_string())),
    }

    // The parsed host ignores userinfo, so `http://x@127.0.0.1` is caught too
    let host = match parsed.host() {
        Some(url::Host::Ipv6(addr)) => format!("[{}]", addr),
        Some(host) => host.to_string().to_lowercase(),
        None => return Err(UrlRejection::MissingHost),
    };

    if BLOCKED_HOSTS.iter().any(|p| p.is_match(&host)) {
        warn!(url = %url, "Blocked source URL");
        return Err(UrlRejection::Blocked(host));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_pass() {
        assert!(validate_source_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
        assert!(validate_source_url("https://vimeo.com/123456").is_ok());
        assert_eq!(
            validate_source_url("  https://youtu.be/abc  ").unwrap(),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn test_internal_hosts_blocked() {
        for url in [
            "http://localhost/video.mp4",
            "http://127.0.0.1:8080/",
            "http://10.0.0.5/a",
            "http://172.20.1.1/a",
            "http://192.168.1.1/a",
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://[::1]/",
            "http://user@127.0.0.1/",
        ] {
            assert!(
                matches!(validate_source_url(url), Err(UrlRejection::Blocked(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_malformed_and_schemes() {
        assert_eq!(validate_source_url(""), Err(UrlRejection::Empty));
        assert!(matches!(validate_source_url("not a url"), Err(UrlRejection::Malformed(_))));
        assert!(matches!(
            validate_source_url("file:///etc/passwd"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_source_url("ftp://example.com/a.mp4"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_source_url(&long), Err(UrlRejection::TooLong));
    }
}
