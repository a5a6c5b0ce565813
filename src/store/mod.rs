//! Object store gateway: existence, download, upload and metadata for single named blobs.
//!
//! Layout:
//! - `http.rs`: bucket reachable over plain HTTP (`HEAD`/`GET`/`PUT` on `base_url/<key>`)
//! - `fs.rs`: directory acting as a bucket (mounted volumes, tests)
//!
//! No retries live here. Retry policy belongs to the bootstrap guard and the sync worker.

mod fs;
mod http;

pub use fs::FsObjectStore;
pub use http::{HttpObjectStore, parse_http_date};

use crate::config::RemoteConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{path::Path, sync::Arc};
use tracing::{debug, warn};

/// Content type attached to every uploaded database copy.
pub const DATABASE_CONTENT_TYPE: &str = "application/vnd.sqlite3";

/// Cache directive attached to every upload so metadata timestamps stay meaningful.
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Server-side view of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobMeta {
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human readable target, used in logs and the status report.
    fn describe(&self) -> String;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Streams the object into `dest`. `dest` is always a staging path, never the live file.
    async fn download(&self, key: &str, dest: &Path) -> Result<(), StoreError>;

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> Result<(), StoreError>;

    async fn metadata(&self, key: &str) -> Result<BlobMeta, StoreError>;
}

/// Cheaply cloneable handle to the configured store, or to nothing at all.
///
/// With no store every call returns [`StoreError::NotConfigured`] so callers can fall back to
/// local-only operation without special casing.
#[derive(Clone, Default)]
pub struct Gateway {
    store: Option<Arc<dyn ObjectStore>>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn unconfigured() -> Self {
        Self::default()
    }

    /// Builds the gateway described by the `remote` config table.
    pub fn from_config(cfg: &RemoteConfig) -> Result<Self, StoreError> {
        if let Some(base_url) = cfg.base_url.as_ref() {
            if cfg.dir.is_some() {
                warn!(
                    base_url = %base_url,
                    "Both remote.base_url and remote.dir are set; using the HTTP store"
                );
            }
            return Ok(Self::new(Arc::new(HttpObjectStore::new(cfg, base_url.clone())?)));
        }
        if let Some(dir) = cfg.dir.as_ref() {
            return Ok(Self::new(Arc::new(FsObjectStore::new(dir))));
        }
        Ok(Self::unconfigured())
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn describe(&self) -> Option<String> {
        self.store.as_ref().map(|s| s.describe())
    }

    fn store(&self) -> Result<&Arc<dyn ObjectStore>, StoreError> {
        self.store.as_ref().ok_or(StoreError::NotConfigured)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.store()?.exists(key).await
    }

    /// Downloads `key` into `dest`, removing whatever was partially written on failure.
    pub async fn download(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let store = self.store()?;
        match store.download(key, dest).await {
            Ok(()) => {
                debug!(key, dest = %dest.display(), "Downloaded object");
                Ok(())
            }
            Err(e) => {
                match tokio::fs::remove_file(dest).await {
                    Err(rm) if rm.kind() != std::io::ErrorKind::NotFound => {
                        warn!(dest = %dest.display(), error = %rm, "Failed to remove partial download");
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    pub async fn upload(&self, key: &str, src: &Path, content_type: &str) -> Result<(), StoreError> {
        self.store()?.upload(key, src, content_type).await?;
        debug!(key, src = %src.display(), "Uploaded object");
        Ok(())
    }

    pub async fn metadata(&self, key: &str) -> Result<BlobMeta, StoreError> {
        self.store()?.metadata(key).await
    }
}

/// Object keys are relative, slash separated names without `.`/`..` segments.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad_segment = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || bad_segment {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
