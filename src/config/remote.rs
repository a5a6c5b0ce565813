use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Remote object store target.
///
/// Leaving both `base_url` and `dir` unset keeps the subsystem local-only: every sync call
/// becomes a successful no-op.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// HTTP bucket endpoint; objects live at `base_url/<key>`.
    /// TOML: `remote.base_url`. Example: `https://bucket.example.com/backups/`.
    #[serde(default)]
    pub base_url: Option<Url>,

    /// Directory acting as the bucket (e.g. a mounted persistent volume).
    /// TOML: `remote.dir`. Ignored when `base_url` is set.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Optional bearer token sent with every HTTP request.
    /// TOML: `remote.token`.
    #[serde(default)]
    pub token: Option<String>,

    /// Optional HTTP proxy for the object store client.
    /// TOML: `remote.proxy`. Example: `http://127.0.0.1:1080`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Object key of the primary copy.
    /// TOML: `remote.primary_key`. Default: `app.db`.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Object key of the backup copy (written on every upload, never read by sync).
    /// TOML: `remote.backup_key`. Default: `app.db.backup`.
    #[serde(default = "default_backup_key")]
    pub backup_key: String,

    /// TOML: `remote.connect_timeout_secs`. Default: `10`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request deadline for a single HTTP call.
    /// TOML: `remote.request_timeout_secs`. Default: `120`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            dir: None,
            token: None,
            proxy: None,
            primary_key: default_primary_key(),
            backup_key: default_backup_key(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() || self.dir.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_primary_key() -> String {
    "app.db".to_string()
}

fn default_backup_key() -> String {
    "app.db.backup".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}
