mod basic;
mod remote;
mod sync;

pub use basic::BasicConfig;
pub use remote::RemoteConfig;
pub use sync::SyncConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Remote object store target (see `remote` table in config.toml).
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Bootstrap, verification and upload tuning (see `sync` table in config.toml).
    #[serde(default)]
    pub sync: SyncConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "BLOBSYNC_";

impl Config {
    /// Builds a Figment that merges defaults, an optional config TOML file, and
    /// `BLOBSYNC_`-prefixed environment variables (`__` separates tables).
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration by merging defaults, `config.toml` if present, and the environment.
    ///
    /// Note: this does **not** validate `basic.admin_key`; the binary checks it before
    /// binding the admin listener.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml + env): {err}")
        })
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_run_local_only() {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert!(!cfg.remote.is_configured());
        assert_eq!(cfg.remote.primary_key, "app.db");
        assert_eq!(cfg.remote.backup_key, "app.db.backup");
        assert_eq!(cfg.basic.database_path, PathBuf::from("data/app.db"));
        assert_eq!(cfg.sync.max_attempts, 5);
        assert_eq!(cfg.sync.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.sync.retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn toml_tables_override_defaults() {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [basic]
                database_path = "/var/lib/app/app.db"

                [remote]
                base_url = "https://bucket.example.com/backups/"
                token = "secret"

                [sync]
                max_attempts = 3
                verify_timeout_ms = 250
                "#,
            ))
            .extract()
            .unwrap();
        assert!(cfg.remote.is_configured());
        assert_eq!(
            cfg.remote.base_url.as_ref().map(url::Url::as_str),
            Some("https://bucket.example.com/backups/")
        );
        assert_eq!(cfg.basic.database_path, PathBuf::from("/var/lib/app/app.db"));
        assert_eq!(cfg.sync.max_attempts, 3);
        assert_eq!(cfg.sync.verify_timeout(), Duration::from_millis(250));
        // Untouched keys keep their defaults.
        assert_eq!(cfg.sync.upload_retry_max_times, 2);
    }
}
