//! Listener configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! host_id = "worker-1"
//! polling_interval_secs = 10
//! scan_mode = "auto"
//!
//! [queue]
//! max_dequeue_count = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ListenerError;

/// Which discovery sources the coordinator polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Hybrid when the storage account produces request logs, sweep-only
    /// otherwise.
    #[default]
    Auto,
    /// Write-log scanning plus paged container sweeps.
    Hybrid,
    /// Write-log scanning only, preceded by one full listing of every
    /// registered container.
    Logs,
    /// Paged container sweeps only.
    Sweep,
}

impl ScanMode {
    /// Resolve [`ScanMode::Auto`] against the storage capabilities.
    #[must_use]
    pub fn resolve(self, supports_write_logging: bool) -> Self {
        match self {
            Self::Auto if supports_write_logging => Self::Hybrid,
            Self::Auto => Self::Sweep,
            other => other,
        }
    }

    #[must_use]
    pub fn scans_logs(self) -> bool {
        matches!(self, Self::Hybrid | Self::Logs)
    }

    #[must_use]
    pub fn sweeps_containers(self) -> bool {
        matches!(self, Self::Hybrid | Self::Sweep)
    }
}

/// Top-level listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Identity of this host; part of every receipt key.
    #[serde(default = "default_host_id")]
    pub host_id: String,
    /// Delay between the end of one polling tick and the start of the next,
    /// 1 to 300 seconds.
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,
    #[serde(default)]
    pub scan_mode: ScanMode,
    /// Blobs listed per tick across all containers.
    #[serde(default = "default_scan_blob_limit_per_poll")]
    pub scan_blob_limit_per_poll: usize,
    /// Hours of write logs inspected on each tick.
    #[serde(default = "default_log_window_hours")]
    pub log_window_hours: u32,
    /// Number of scanned log names remembered before the cache is cleared.
    #[serde(default = "default_log_cache_capacity")]
    pub log_cache_capacity: usize,
    /// Retention applied when write logging has to be switched on.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    /// Container holding dispatch receipts.
    #[serde(default = "default_receipt_container")]
    pub receipt_container: String,
    /// Receipt lease duration, 15 to 60 seconds.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Trigger queue consumer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Deliveries allowed before a message is treated as poison.
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
    #[serde(default = "default_min_poll_interval_millis")]
    pub min_poll_interval_millis: u64,
    #[serde(default = "default_max_poll_interval_secs")]
    pub max_poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub poison_queue_enabled: bool,
}

fn default_host_id() -> String {
    "blobwatch-host".to_owned()
}

const MAX_POLLING_INTERVAL_SECS: u64 = 300;
/// Seven days, the longest a storage queue message may stay invisible.
const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_QUEUE_POLL_INTERVAL_SECS: u64 = 60 * 60;

fn default_polling_interval_secs() -> u64 {
    10
}

fn default_scan_blob_limit_per_poll() -> usize {
    10_000
}

fn default_log_window_hours() -> u32 {
    2
}

fn default_log_cache_capacity() -> usize {
    100_000
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_receipt_container() -> String {
    "blobwatch-hosts".to_owned()
}

fn default_lease_duration_secs() -> u64 {
    30
}

fn default_visibility_timeout_secs() -> u64 {
    600
}

fn default_max_dequeue_count() -> u32 {
    5
}

fn default_min_poll_interval_millis() -> u64 {
    100
}

fn default_max_poll_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host_id: default_host_id(),
            polling_interval_secs: default_polling_interval_secs(),
            scan_mode: ScanMode::default(),
            scan_blob_limit_per_poll: default_scan_blob_limit_per_poll(),
            log_window_hours: default_log_window_hours(),
            log_cache_capacity: default_log_cache_capacity(),
            log_retention_days: default_log_retention_days(),
            receipt_container: default_receipt_container(),
            lease_duration_secs: default_lease_duration_secs(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_dequeue_count: default_max_dequeue_count(),
            min_poll_interval_millis: default_min_poll_interval_millis(),
            max_poll_interval_secs: default_max_poll_interval_secs(),
            poison_queue_enabled: true,
        }
    }
}

impl ListenerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ListenerError> {
        let config: Self =
            toml::from_str(s).map_err(|e| ListenerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ListenerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ListenerError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ListenerError> {
        let invalid = |msg: &str| Err(ListenerError::Configuration(msg.to_owned()));

        if self.host_id.is_empty() || self.host_id.contains('/') {
            return invalid("host_id must be non-empty and must not contain '/'");
        }
        if !(1..=MAX_POLLING_INTERVAL_SECS).contains(&self.polling_interval_secs) {
            return invalid("polling_interval_secs must be between 1 and 300");
        }
        if self.scan_blob_limit_per_poll == 0 {
            return invalid("scan_blob_limit_per_poll must be positive");
        }
        if self.log_window_hours == 0 {
            return invalid("log_window_hours must be at least 1");
        }
        if self.log_cache_capacity == 0 {
            return invalid("log_cache_capacity must be positive");
        }
        if self.receipt_container.is_empty() {
            return invalid("receipt_container must be non-empty");
        }
        if !(15..=60).contains(&self.lease_duration_secs) {
            return invalid("lease_duration_secs must be between 15 and 60");
        }
        if !(1..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&self.queue.visibility_timeout_secs) {
            return invalid("queue.visibility_timeout_secs must be between 1 and 604800");
        }
        if !(1..=MAX_QUEUE_POLL_INTERVAL_SECS).contains(&self.queue.max_poll_interval_secs) {
            return invalid("queue.max_poll_interval_secs must be between 1 and 3600");
        }
        if self.queue.max_dequeue_count == 0 {
            return invalid("queue.max_dequeue_count must be at least 1");
        }
        if self.queue.min_poll_interval() > self.queue.max_poll_interval() {
            return invalid("queue.min_poll_interval_millis exceeds max_poll_interval_secs");
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_millis)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }
}
