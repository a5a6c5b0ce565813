use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bootstrap, verification, upload and connection tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Download attempts made when no local file exists.
    /// TOML: `sync.max_attempts`. Default: `5`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hard deadline for one bootstrap download attempt.
    /// TOML: `sync.attempt_timeout_secs`. Default: `30`.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Pause between bootstrap attempts.
    /// TOML: `sync.retry_delay_secs`. Default: `2`.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Deadline for the engine stage of an integrity check.
    /// TOML: `sync.verify_timeout_ms`. Default: `500`.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,

    /// Also run `PRAGMA quick_check` during verification (slower, scans every page).
    /// TOML: `sync.quick_check`. Default: `false`.
    #[serde(default)]
    pub quick_check: bool,

    /// Extra upload attempts after a retryable failure in write-sync.
    /// TOML: `sync.upload_retry_max_times`. Default: `2`.
    #[serde(default = "default_upload_retry_max_times")]
    pub upload_retry_max_times: usize,

    /// TOML: `sync.max_connections`. Default: `4`.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// TOML: `sync.busy_timeout_secs`. Default: `5`.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Prepared statements kept per process, keyed by query text.
    /// TOML: `sync.statement_cache_capacity`. Default: `256`.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            verify_timeout_ms: default_verify_timeout_ms(),
            quick_check: false,
            upload_retry_max_times: default_upload_retry_max_times(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
            statement_cache_capacity: default_statement_cache_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_verify_timeout_ms() -> u64 {
    500
}

fn default_upload_retry_max_times() -> usize {
    2
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_statement_cache_capacity() -> u64 {
    256
}
