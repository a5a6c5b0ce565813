use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// Admin HTTP server listen address (e.g., "0.0.0.0", "127.0.0.1").
    /// TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// Admin HTTP server listen port.
    /// TOML: `basic.listen_port`. Default: `8190`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Path of the local SQLite database file (on ephemeral disk).
    /// TOML: `basic.database_path`. Default: `data/app.db`.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Log level for tracing subscriber initialization (e.g., "error", "warn", "info", "debug", "trace").
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default)]
    pub loglevel: String,

    /// Key required by the admin endpoints (required by the binary, non-empty).
    /// TOML: `basic.admin_key`.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_string_lax")]
    pub admin_key: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            database_path: default_database_path(),
            loglevel: "info".to_string(),
            // No insecure default. The binary refuses to start with an empty key.
            admin_key: String::new(),
        }
    }
}

fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a number for basic.admin_key",
        )),
    }
}

/// Default IP address for the admin HTTP server listen address.
fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}

/// Default port for the admin HTTP server.
fn default_listen_port() -> u16 {
    8190
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/app.db")
}
