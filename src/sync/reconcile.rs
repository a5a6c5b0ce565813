use super::{
    SyncSettings,
    bootstrap::{BootstrapGuard, BootstrapOutcome, BootstrapReport},
    files,
    integrity::{IntegrityVerifier, Verdict},
    marker,
};
use crate::db::checkpoint_path;
use crate::error::{StoreError, SyncError};
use crate::store::{DATABASE_CONTENT_TYPE, Gateway};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, time::Duration};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDecision {
    Download,
    Upload,
    None,
    FreshCreate,
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncDecision::Download => "download",
            SyncDecision::Upload => "upload",
            SyncDecision::None => "none",
            SyncDecision::FreshCreate => "fresh-create",
        })
    }
}

/// What the remote side looks like at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Absent,
    /// Known to exist; `last_modified` is `None` when only existence was checked.
    Present {
        last_modified: Option<DateTime<Utc>>,
    },
    /// The store could not be asked (transport failure).
    Unknown,
}

/// The startup decision table.
///
/// Timestamps compare at whole-second resolution because HTTP dates carry nothing finer;
/// a tie keeps the local copy. An unknown remote never causes the local file to be replaced.
pub fn decide(local_modified: Option<DateTime<Utc>>, remote: &RemoteState) -> SyncDecision {
    match (local_modified, remote) {
        (None, RemoteState::Absent) => SyncDecision::FreshCreate,
        (None, RemoteState::Present { .. } | RemoteState::Unknown) => SyncDecision::Download,
        (Some(_), RemoteState::Absent) => SyncDecision::Upload,
        (Some(_), RemoteState::Unknown) => SyncDecision::None,
        (Some(local), RemoteState::Present { last_modified }) => match last_modified {
            Some(remote) if remote.timestamp() > local.timestamp() => SyncDecision::Download,
            _ => SyncDecision::Upload,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub decision: SyncDecision,
    /// False when the decided transfer was skipped (already current) or failed and was
    /// degraded to keeping the local copy.
    pub transferred: bool,
    pub bootstrap: Option<BootstrapReport>,
}

impl ReconcileReport {
    fn new(decision: SyncDecision, transferred: bool) -> Self {
        Self {
            decision,
            transferred,
            bootstrap: None,
        }
    }
}

/// Decides, once per process, which copy is authoritative and moves bytes accordingly.
///
/// Runs before the database is opened for the application. Remote failures degrade to
/// "keep using local"; only local disk failures are returned as errors.
pub struct Reconciler {
    gateway: Gateway,
    settings: SyncSettings,
    verifier: IntegrityVerifier,
}

impl Reconciler {
    pub fn new(gateway: Gateway, settings: SyncSettings) -> Self {
        let verifier = settings.verifier();
        Self {
            gateway,
            settings,
            verifier,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport, SyncError> {
        let path = &self.settings.database_path;
        let local_modified = files::local_modified(path).await?;

        if !self.gateway.is_configured() {
            let decision = if local_modified.is_some() {
                SyncDecision::None
            } else {
                SyncDecision::FreshCreate
            };
            info!(
                path = %path.display(),
                %decision,
                "Remote object store not configured; running local-only"
            );
            return Ok(ReconcileReport::new(decision, false));
        }

        if local_modified.is_none() {
            return self.run_without_local().await;
        }

        let remote = self.remote_state().await;
        let decision = decide(local_modified, &remote);
        info!(
            path = %path.display(),
            local_modified = ?local_modified,
            remote = ?remote,
            %decision,
            "Startup reconciliation decided"
        );

        let transferred = match decision {
            SyncDecision::Download => self.replace_local().await?,
            SyncDecision::Upload => self.upload_local(&remote).await?,
            SyncDecision::None => {
                warn!(
                    path = %path.display(),
                    "Remote state unknown; keeping the local database and skipping the upload"
                );
                false
            }
            SyncDecision::FreshCreate => false,
        };
        Ok(ReconcileReport::new(decision, transferred))
    }

    async fn remote_state(&self) -> RemoteState {
        let deadline = self.settings.bootstrap.attempt_timeout;
        match with_deadline(deadline, self.gateway.metadata(&self.settings.keys.primary)).await {
            Ok(meta) => RemoteState::Present {
                last_modified: Some(meta.last_modified),
            },
            Err(StoreError::NotFound(_)) => RemoteState::Absent,
            Err(e) => {
                warn!(key = %self.settings.keys.primary, error = %e, "Remote metadata check failed");
                RemoteState::Unknown
            }
        }
    }

    async fn run_without_local(&self) -> Result<ReconcileReport, SyncError> {
        let key = &self.settings.keys.primary;
        let deadline = self.settings.bootstrap.attempt_timeout;
        let remote = match with_deadline(deadline, self.gateway.exists(key)).await {
            Ok(true) => RemoteState::Present {
                last_modified: None,
            },
            Ok(false) => RemoteState::Absent,
            Err(e) => {
                warn!(key, error = %e, "Remote existence check failed; bootstrapping anyway");
                RemoteState::Unknown
            }
        };

        if decide(None, &remote) == SyncDecision::FreshCreate {
            info!(
                key,
                path = %self.settings.database_path.display(),
                "No local database and no remote copy; creating a fresh database"
            );
            return Ok(ReconcileReport::new(SyncDecision::FreshCreate, false));
        }

        let mut policy = self.settings.bootstrap.clone();
        if remote == RemoteState::Unknown {
            // The failed existence check already spent one attempt's budget.
            policy.max_attempts = policy.max_attempts.saturating_sub(1).max(1);
        }
        let report = BootstrapGuard::new(&self.gateway, &self.verifier, &policy)
            .run(key, &self.settings.database_path)
            .await?;
        let (decision, transferred) = match report.outcome {
            BootstrapOutcome::Recovered => (SyncDecision::Download, true),
            BootstrapOutcome::RemoteAbsent | BootstrapOutcome::Exhausted => {
                (SyncDecision::FreshCreate, false)
            }
        };
        Ok(ReconcileReport {
            decision,
            transferred,
            bootstrap: Some(report),
        })
    }

    /// Remote is newer: stage, verify, promote. Any remote-side failure keeps the local file.
    async fn replace_local(&self) -> Result<bool, SyncError> {
        let path = &self.settings.database_path;
        let key = &self.settings.keys.primary;
        let staged = files::staging_path(path, "download");
        let deadline = self.settings.bootstrap.attempt_timeout;

        if let Err(e) = with_deadline(deadline, self.gateway.download(key, &staged)).await {
            warn!(key, error = %e, "Download of newer remote copy failed; keeping local");
            files::discard(&staged).await;
            return Ok(false);
        }

        if let Verdict::Corrupt(reason) = self.verifier.verify(&staged).await {
            warn!(key, %reason, "Newer remote copy failed verification; keeping local");
            files::discard(&staged).await;
            return Ok(false);
        }

        let transferred = match marker::fingerprint(&staged).await {
            Ok(fp) => fp,
            Err(e) => {
                files::discard(&staged).await;
                return Err(SyncError::local_io(&staged, e));
            }
        };

        // Fold any write-ahead log into the old file first, so a failed rename below leaves
        // a self-contained local copy behind.
        if let Err(e) = checkpoint_path(path).await {
            warn!(path = %path.display(), error = %e, "Checkpoint before replacement failed");
        }
        if let Err(e) = files::promote(&staged, path).await {
            files::discard(&staged).await;
            return Err(e);
        }
        marker::record_transfer(&self.gateway, key, path, transferred).await;
        info!(key, path = %path.display(), "Replaced local database with newer remote copy");
        Ok(true)
    }

    /// Local wins: checkpoint, verify, then upload unless the remote already holds these bytes.
    async fn upload_local(&self, remote: &RemoteState) -> Result<bool, SyncError> {
        let path = &self.settings.database_path;
        let key = &self.settings.keys.primary;

        if let Err(e) = checkpoint_path(path).await {
            warn!(path = %path.display(), error = %e, "Checkpoint before startup upload failed");
        }
        if let Verdict::Corrupt(reason) = self.verifier.verify(path).await {
            error!(
                path = %path.display(),
                %reason,
                "Local database failed verification; NOT uploading it. The remote copy is left untouched."
            );
            return Ok(false);
        }

        let local = marker::fingerprint(path)
            .await
            .map_err(|e| SyncError::local_io(path, e))?;

        let remote_modified = match remote {
            RemoteState::Present { last_modified } => *last_modified,
            RemoteState::Absent | RemoteState::Unknown => None,
        };
        if let Some(remote_modified) = remote_modified {
            match marker::load(path).await {
                Some(previous) if previous.matches(&local, remote_modified) => {
                    info!(key, size = local.size, "Remote copy already matches local; skipping upload");
                    return Ok(false);
                }
                _ => {}
            }
        }

        if let Err(e) = self.upload_to(key).await {
            warn!(key, error = %e, "Startup upload failed; continuing with the local copy");
            return Ok(false);
        }
        let backup = &self.settings.keys.backup;
        if let Err(e) = self.upload_to(backup).await {
            warn!(key = %backup, error = %e, "Backup upload failed");
        }

        let size = local.size;
        marker::record_transfer(&self.gateway, key, path, local).await;
        info!(key, size, "Seeded remote copy from local database");
        Ok(true)
    }

    async fn upload_to(&self, key: &str) -> Result<(), StoreError> {
        let deadline = self.settings.transfer_timeout;
        let path = &self.settings.database_path;
        with_deadline(deadline, self.gateway.upload(key, path, DATABASE_CONTENT_TYPE)).await
    }
}

/// Bounds one remote call; an expired deadline reads as [`StoreError::Timeout`].
async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(deadline)))
}
