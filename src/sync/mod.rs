//! Durability and synchronization of the local database file with its remote copy.
//!
//! Layout:
//! - `integrity.rs`: read-only structural check of a candidate database file
//! - `reconcile.rs`: once-per-process startup decision (download / upload / none / fresh-create)
//! - `bootstrap.rs`: bounded, blocking recovery when no local file exists
//! - `worker.rs`: sequenced write-sync and manual upload/download (ractor actor)
//! - `marker.rs`: fingerprint of the last transferred copy, used to skip redundant uploads
//! - `status.rs`: last outcomes, surfaced to operators
//! - `files.rs`: staging, promotion and timestamp helpers for the local file

pub mod bootstrap;
pub mod integrity;
pub mod marker;
pub mod reconcile;
pub mod status;
pub mod worker;

pub(crate) mod files;

pub use bootstrap::{
    AttemptOutcome, BootstrapAttemptRecord, BootstrapGuard, BootstrapOutcome, BootstrapPolicy,
    BootstrapReport,
};
pub use integrity::{IntegrityVerifier, Verdict};
pub use reconcile::{ReconcileReport, Reconciler, RemoteState, SyncDecision, decide};
pub use status::{StartupSummary, StatusSnapshot, SyncRecord, SyncStatus, SyncTrigger};
pub use worker::{SyncOutcome, SyncWorkerHandle};

use crate::config::Config;
use crate::db::DatabaseSettings;
use std::{path::PathBuf, time::Duration};

/// Object keys of the two remote copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKeys {
    /// Drives every sync decision.
    pub primary: String,
    /// Refreshed on every write-sync, read only for manual recovery.
    pub backup: String,
}

impl Default for BlobKeys {
    fn default() -> Self {
        Self {
            primary: "app.db".to_string(),
            backup: "app.db.backup".to_string(),
        }
    }
}

/// Everything the subsystem needs besides the gateway itself.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub database_path: PathBuf,
    pub keys: BlobKeys,
    pub bootstrap: BootstrapPolicy,
    pub verify_timeout: Duration,
    pub quick_check: bool,
    /// Extra attempts for a write-sync upload after a retryable failure.
    pub upload_retry_max_times: usize,
    /// Deadline for one upload, or for a download outside of bootstrap.
    pub transfer_timeout: Duration,
    pub database: DatabaseSettings,
}

impl SyncSettings {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            keys: BlobKeys::default(),
            bootstrap: BootstrapPolicy::default(),
            verify_timeout: Duration::from_millis(500),
            quick_check: false,
            upload_retry_max_times: 2,
            transfer_timeout: Duration::from_secs(120),
            database: DatabaseSettings::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            database_path: cfg.basic.database_path.clone(),
            keys: BlobKeys {
                primary: cfg.remote.primary_key.clone(),
                backup: cfg.remote.backup_key.clone(),
            },
            bootstrap: BootstrapPolicy {
                max_attempts: cfg.sync.max_attempts,
                attempt_timeout: cfg.sync.attempt_timeout(),
                retry_delay: cfg.sync.retry_delay(),
            },
            verify_timeout: cfg.sync.verify_timeout(),
            quick_check: cfg.sync.quick_check,
            upload_retry_max_times: cfg.sync.upload_retry_max_times,
            transfer_timeout: cfg.remote.request_timeout(),
            database: DatabaseSettings {
                max_connections: cfg.sync.max_connections,
                busy_timeout: cfg.sync.busy_timeout(),
                statement_cache_capacity: cfg.sync.statement_cache_capacity,
            },
        }
    }

    pub fn verifier(&self) -> IntegrityVerifier {
        IntegrityVerifier::new(self.verify_timeout, self.quick_check)
    }
}
