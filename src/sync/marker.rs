//! Fingerprint of the copy most recently transferred to or from the remote.
//!
//! Stored beside the database as `<db>.sync.json`. Losing it is harmless: the next startup
//! simply uploads once more.

use super::files;
use crate::error::SyncError;
use crate::store::Gateway;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMarker {
    pub sha256: String,
    pub size: u64,
    pub remote_last_modified: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl SyncMarker {
    /// True when the local bytes and the remote object are both exactly what was last transferred.
    pub fn matches(&self, local: &Fingerprint, remote_last_modified: DateTime<Utc>) -> bool {
        self.sha256 == local.sha256
            && self.size == local.size
            && self.remote_last_modified == remote_last_modified
    }
}

pub fn marker_path(db_path: &Path) -> PathBuf {
    files::with_suffix(db_path, ".sync.json")
}

pub async fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(Fingerprint {
        sha256: hex::encode(hasher.finalize()),
        size,
    })
}

pub async fn load(db_path: &Path) -> Option<SyncMarker> {
    let path = marker_path(db_path);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "Sync marker unreadable");
            }
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(marker) => Some(marker),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Sync marker malformed; ignoring");
            None
        }
    }
}

pub async fn save(db_path: &Path, marker: &SyncMarker) -> Result<(), SyncError> {
    let path = marker_path(db_path);
    let staged = files::staging_path(&path, "write");
    let body = serde_json::to_vec_pretty(marker)?;
    tokio::fs::write(&staged, body)
        .await
        .map_err(|e| SyncError::local_io(&staged, e))?;
    if let Err(e) = tokio::fs::rename(&staged, &path).await {
        files::discard(&staged).await;
        return Err(SyncError::local_io(path, e));
    }
    Ok(())
}

/// After a successful transfer: align the local file's mtime with the remote object and
/// remember what was transferred. Best effort; failures only cost a redundant upload later.
pub(crate) async fn record_transfer(
    gateway: &Gateway,
    key: &str,
    db_path: &Path,
    transferred: Fingerprint,
) {
    let meta = match gateway.metadata(key).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(key, error = %e, "Could not read remote metadata after transfer; sync marker not updated");
            return;
        }
    };

    if let Err(e) = files::set_modified(db_path, meta.last_modified).await {
        warn!(path = %db_path.display(), error = %e, "Could not align local modification time");
    }

    let marker = SyncMarker {
        sha256: transferred.sha256,
        size: transferred.size,
        remote_last_modified: meta.last_modified,
        recorded_at: Utc::now(),
    };
    if let Err(e) = save(db_path, &marker).await {
        warn!(path = %db_path.display(), error = %e, "Could not persist sync marker");
    }
}
