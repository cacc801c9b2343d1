//! Pipeline configuration.
//!
//! Every knob is a field on a plain struct handed to the stages at
//! construction; nothing is read from the environment after startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::NormalizeProfile;
use reel_publish::PublishMetadata;
use tracing::warn;

/// Time a lease must cover beyond the concat tool itself: member downloads,
/// the compilation upload and member deletes.
const LEASE_TRANSFER_MARGIN: Duration = Duration::from_secs(30 * 60);

/// Shortest trigger refresh cadence.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Batch-Ready Gate settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Normalized items required before a batch is claimed
    pub min_batch_size: usize,
    /// Serialize claims through a lease object in the control bucket
    pub use_claim_lease: bool,
    /// How long a claim holds before others may take it over
    pub lease_ttl: Duration,
    /// Cap on members per batch; the oldest items are taken first
    pub max_batch_size: Option<usize>,
    /// Name of the lease object
    pub lease_name: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 30,
            use_claim_lease: true,
            lease_ttl: Duration::from_secs(2 * 60 * 60),
            max_batch_size: None,
            lease_name: "concatenate".to_string(),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_batch_size: env_parse("GATE_MIN_BATCH_SIZE").unwrap_or(defaults.min_batch_size),
            use_claim_lease: env_flag("GATE_USE_LEASE", defaults.use_claim_lease),
            lease_ttl: env_parse("GATE_LEASE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            max_batch_size: env_parse::<usize>("GATE_MAX_BATCH_SIZE").filter(|n| *n > 0),
            lease_name: std::env::var("GATE_LEASE_NAME").unwrap_or(defaults.lease_name),
        }
    }

    pub fn with_min_batch_size(mut self, n: usize) -> Self {
        self.min_batch_size = n;
        self
    }

    pub fn with_lease(mut self, enabled: bool) -> Self {
        self.use_claim_lease = enabled;
        self
    }
}

/// External tool locations, limits and encoding profile.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub ffmpeg_path: String,
    pub ytdlp_path: String,
    pub fetch_timeout: Duration,
    pub transcode_timeout: Duration,
    pub concat_timeout: Duration,
    /// Extra yt-dlp flags (cookies, proxy)
    pub fetch_extra_args: Vec<String>,
    pub profile: NormalizeProfile,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            fetch_timeout: Duration::from_secs(600),
            transcode_timeout: Duration::from_secs(3600),
            concat_timeout: Duration::from_secs(3600),
            fetch_extra_args: Vec::new(),
            profile: NormalizeProfile::default(),
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut profile = defaults.profile;
        if let Ok(preset) = std::env::var("NORMALIZE_PRESET") {
            profile = profile.with_preset(preset);
        }
        if let Some(crf) = env_parse("NORMALIZE_CRF") {
            profile = profile.with_crf(crf);
        }

        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            fetch_timeout: env_parse("FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            transcode_timeout: env_parse("TRANSCODE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.transcode_timeout),
            concat_timeout: env_parse("CONCAT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.concat_timeout),
            fetch_extra_args: std::env::var("FETCH_EXTRA_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            profile,
        }
    }
}

/// Publish stage settings.
#[derive(Debug, Clone, Default)]
pub struct PublishConfig {
    /// Title/description templates, category and privacy
    pub metadata: PublishMetadata,
    /// Remove the compilation after a successful publish (archive first)
    pub delete_after: bool,
}

impl PublishConfig {
    pub fn from_env() -> Self {
        let defaults = PublishMetadata::default();
        Self {
            metadata: PublishMetadata {
                title: std::env::var("PUBLISH_TITLE").unwrap_or(defaults.title),
                description: std::env::var("PUBLISH_DESCRIPTION").unwrap_or(defaults.description),
                category_id: std::env::var("PUBLISH_CATEGORY_ID").unwrap_or(defaults.category_id),
                privacy_status: std::env::var("PUBLISH_PRIVACY").unwrap_or(defaults.privacy_status),
                tags: std::env::var("PUBLISH_TAGS")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or(defaults.tags),
            },
            delete_after: env_flag("PUBLISH_DELETE_AFTER", false),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of every per-run scratch directory
    pub work_dir: PathBuf,
    /// Maximum concurrently running stage tasks
    pub max_tasks: usize,
    /// How long to wait for in-flight tasks on shutdown
    pub shutdown_timeout: Duration,
    /// How long a consumer blocks waiting for new triggers
    pub consume_block: Duration,
    /// How often pending triggers are scanned for reclaim
    pub reclaim_interval: Duration,
    /// Minimum idle time before a pending trigger is redelivered
    pub reclaim_min_idle: Duration,
    /// Periodic gate evaluation; `None` disables polling
    pub gate_poll_interval: Option<Duration>,
    pub gate: GateConfig,
    pub tools: ToolConfig,
    pub publish: PublishConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("reel"),
            max_tasks: 2,
            shutdown_timeout: Duration::from_secs(60),
            consume_block: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(30),
            reclaim_min_idle: Duration::from_secs(300),
            gate_poll_interval: Some(Duration::from_secs(300)),
            gate: GateConfig::default(),
            tools: ToolConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_tasks: env_parse::<usize>("WORKER_MAX_TASKS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_tasks),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            consume_block: defaults.consume_block,
            reclaim_interval: env_parse("WORKER_RECLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reclaim_interval),
            reclaim_min_idle: env_parse("WORKER_RECLAIM_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reclaim_min_idle),
            gate_poll_interval: match env_parse::<u64>("GATE_POLL_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.gate_poll_interval,
            },
            gate: GateConfig::from_env(),
            tools: ToolConfig::from_env(),
            publish: PublishConfig::from_env(),
        }
        .enforce_floors()
    }

    /// Raise settings under which running work could be taken over: a claim
    /// lease TTL shorter than a concatenation may take, or a reclaim idle
    /// time too short to refresh triggers within.
    pub fn enforce_floors(mut self) -> Self {
        let floor = self.tools.concat_timeout + LEASE_TRANSFER_MARGIN;
        if self.gate.use_claim_lease && self.gate.lease_ttl < floor {
            warn!(
                "Gate lease TTL {}s is below concat timeout plus transfer margin, raising to {}s",
                self.gate.lease_ttl.as_secs(),
                floor.as_secs()
            );
            self.gate.lease_ttl = floor;
        }

        let idle_floor = MIN_HEARTBEAT * 3;
        if self.reclaim_min_idle < idle_floor {
            warn!(
                "Reclaim idle {}ms leaves no room for trigger refreshes, raising to {}s",
                self.reclaim_min_idle.as_millis(),
                idle_floor.as_secs()
            );
            self.reclaim_min_idle = idle_floor;
        }
        self
    }

    /// How often a running delivery is refreshed so reclaim leaves it alone.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.reclaim_min_idle / 3).max(MIN_HEARTBEAT)
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }
}
