use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{TillError, TillResult};
use crate::types::EntityType;

/// Top-level configuration (loaded from till.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TillConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics + health endpoint (default: 127.0.0.1:9200)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the local record store and sync state
    pub data_dir: PathBuf,
    /// Base URL of the central store
    pub remote_url: String,
    /// Ceiling for every remote call, in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempt limit applied when an enqueue request does not set one
    pub default_max_attempts: u32,
    /// Backoff base delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Upper bound of random jitter, as a fraction of the current delay (0.0..=1.0)
    pub jitter_ratio: f64,
    /// Move operations straight to failed when the remote rejects them
    pub fail_fast_on_rejection: bool,
}

/// What to do when either side of a changed record has no modification timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimestampPolicy {
    /// Declare a conflict if any non-system field differs
    #[default]
    Flag,
    /// Never declare a conflict; the source copy overwrites the destination
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic full-sync interval in seconds
    pub interval_secs: u64,
    /// Delay after an offline→online transition before syncing, in milliseconds
    pub settle_delay_ms: u64,
    /// Connectivity probe interval in seconds (0 disables probing)
    pub probe_interval_secs: u64,
    /// Conflict policy for records lacking a timestamp
    pub missing_timestamp: MissingTimestampPolicy,
    /// Synchronized tables, in sync order
    pub entities: Vec<EntityType>,
}

impl TillConfig {
    /// Read and parse a TOML config file. Missing sections take defaults.
    pub fn from_file(path: &Path) -> TillResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TillConfig = toml::from_str(&content)
            .map_err(|e| TillError::Config(format!("parsing {}: {e}", path.display())))?;
        debug!(
            path = %path.display(),
            entities = config.sync.entities.len(),
            "config loaded"
        );
        Ok(config)
    }
}

impl StorageConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9200".into()),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/till"),
            remote_url: "http://localhost:8080/api".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            jitter_ratio: 0.5,
            fail_fast_on_rejection: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            settle_delay_ms: 2_000,
            probe_interval_secs: 15,
            missing_timestamp: MissingTimestampPolicy::Flag,
            entities: EntityType::ALL.to_vec(),
        }
    }
}
