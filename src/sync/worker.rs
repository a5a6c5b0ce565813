use super::{
    SyncSettings, files,
    integrity::{IntegrityVerifier, Verdict},
    marker,
    status::{SyncStatus, SyncTrigger},
};
use crate::db::{Database, handle::is_corruption};
use crate::error::{IsRetryable, StoreError, SyncError};
use crate::store::{DATABASE_CONTENT_TYPE, Gateway};
use backon::{ExponentialBuilder, Retryable};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// What a write-sync or a manual transfer achieved.
///
/// Only a broken local disk is an `Err`; every remote-side problem lands here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Uploaded,
    Downloaded,
    SkippedNotConfigured,
    SkippedCorrupt,
    /// A forced download found no remote copy; the local file is untouched.
    RemoteMissing,
    Failed {
        reason: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Uploaded | SyncOutcome::Downloaded | SyncOutcome::SkippedNotConfigured
        )
    }
}

#[derive(Debug)]
pub enum SyncMessage {
    /// Push the committed local state to the primary and backup keys.
    WriteCommitted(RpcReplyPort<Result<SyncOutcome, SyncError>>),

    /// Same as a write-sync, triggered by an operator.
    ForceUpload(RpcReplyPort<Result<SyncOutcome, SyncError>>),

    /// Replace the live database with the verified primary remote copy.
    ForceDownload(RpcReplyPort<Result<SyncOutcome, SyncError>>),
}

#[derive(Clone)]
pub struct SyncWorkerHandle {
    actor: ActorRef<SyncMessage>,
}

impl SyncWorkerHandle {
    pub async fn write_committed(&self) -> Result<SyncOutcome, SyncError> {
        ractor::call!(self.actor, SyncMessage::WriteCommitted)
            .map_err(|e| SyncError::Actor(format!("SyncWorker WriteCommitted RPC failed: {e}")))?
    }

    pub async fn force_upload(&self) -> Result<SyncOutcome, SyncError> {
        ractor::call!(self.actor, SyncMessage::ForceUpload)
            .map_err(|e| SyncError::Actor(format!("SyncWorker ForceUpload RPC failed: {e}")))?
    }

    pub async fn force_download(&self) -> Result<SyncOutcome, SyncError> {
        ractor::call!(self.actor, SyncMessage::ForceDownload)
            .map_err(|e| SyncError::Actor(format!("SyncWorker ForceDownload RPC failed: {e}")))?
    }

    /// Stops after the message being processed, if any.
    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

pub struct SyncWorkerArgs {
    pub db: Arc<Database>,
    pub gateway: Gateway,
    pub settings: SyncSettings,
    pub status: Arc<SyncStatus>,
}

struct SyncWorkerState {
    db: Arc<Database>,
    gateway: Gateway,
    settings: SyncSettings,
    verifier: IntegrityVerifier,
    retry_policy: ExponentialBuilder,
    status: Arc<SyncStatus>,
}

/// Owns every transfer after startup, so a write-sync and a manual transfer never overlap.
struct SyncWorker;

#[ractor::async_trait]
impl Actor for SyncWorker {
    type Msg = SyncMessage;
    type State = SyncWorkerState;
    type Arguments = SyncWorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(args.settings.upload_retry_max_times)
            .with_jitter();

        debug!(
            path = %args.settings.database_path.display(),
            remote = args.gateway.describe().unwrap_or_else(|| "<not configured>".to_string()),
            "SyncWorker initialized"
        );
        Ok(SyncWorkerState {
            verifier: args.settings.verifier(),
            db: args.db,
            gateway: args.gateway,
            settings: args.settings,
            retry_policy,
            status: args.status,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SyncMessage::WriteCommitted(reply) => {
                let res = state.push().await;
                state.status.record(SyncTrigger::WriteCommitted, &res);
                let _ = reply.send(res);
            }
            SyncMessage::ForceUpload(reply) => {
                let res = state.push().await;
                state.status.record(SyncTrigger::ManualUpload, &res);
                let _ = reply.send(res);
            }
            SyncMessage::ForceDownload(reply) => {
                let res = state.pull().await;
                state.status.record(SyncTrigger::ManualDownload, &res);
                let _ = reply.send(res);
            }
        }
        Ok(())
    }
}

impl SyncWorkerState {
    async fn push(&self) -> Result<SyncOutcome, SyncError> {
        if !self.gateway.is_configured() {
            debug!("Remote object store not configured; write-sync skipped");
            return Ok(SyncOutcome::SkippedNotConfigured);
        }

        let path = self.db.path();
        if let Verdict::Corrupt(reason) = self.verifier.verify_header(path).await {
            return Ok(self.skip_corrupt(&reason));
        }

        match self.db.checkpoint().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(path = %path.display(), "Log not fully folded in; the snapshot still carries it");
            }
            Err(e) if is_corruption(&e) => return Ok(self.skip_corrupt(&e.to_string())),
            Err(e) => return Err(e),
        }

        let staged = files::staging_path(path, "upload");
        match self.db.snapshot_to(&staged).await {
            Ok(()) => {}
            Err(e) if is_corruption(&e) => {
                files::discard(&staged).await;
                return Ok(self.skip_corrupt(&e.to_string()));
            }
            Err(e) => {
                files::discard(&staged).await;
                return Err(e);
            }
        }
        let res = self.push_staged(&staged).await;
        files::discard(&staged).await;
        res
    }

    fn skip_corrupt(&self, reason: &str) -> SyncOutcome {
        error!(
            path = %self.db.path().display(),
            %reason,
            "Local database failed verification; NOT uploading it"
        );
        SyncOutcome::SkippedCorrupt
    }

    /// Uploads a frozen snapshot, so the bytes checked, hashed and sent are the same bytes.
    async fn push_staged(&self, staged: &Path) -> Result<SyncOutcome, SyncError> {
        let path = self.db.path();
        if let Verdict::Corrupt(reason) = self.verifier.verify(staged).await {
            return Ok(self.skip_corrupt(&reason));
        }
        let fingerprint = marker::fingerprint(staged)
            .await
            .map_err(|e| SyncError::local_io(staged, e))?;

        let keys = &self.settings.keys;
        if let Err(e) = self.upload_with_retry(&keys.primary, staged).await {
            warn!(
                key = %keys.primary,
                error = %e,
                "Write-sync upload failed; the committed write is durable locally only"
            );
            return Ok(SyncOutcome::Failed {
                reason: e.to_string(),
            });
        }
        if let Err(e) = self.upload_with_retry(&keys.backup, staged).await {
            warn!(key = %keys.backup, error = %e, "Backup upload failed");
        }

        let size = fingerprint.size;
        marker::record_transfer(&self.gateway, &keys.primary, path, fingerprint).await;
        info!(key = %keys.primary, size, "Database synced to remote");
        Ok(SyncOutcome::Uploaded)
    }

    async fn upload_with_retry(&self, key: &str, src: &Path) -> Result<(), StoreError> {
        let deadline = self.settings.transfer_timeout;
        let op = || async move {
            match tokio::time::timeout(
                deadline,
                self.gateway.upload(key, src, DATABASE_CONTENT_TYPE),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(StoreError::Timeout(deadline)),
            }
        };

        op.retry(&self.retry_policy)
            .when(|e: &StoreError| e.is_retryable())
            .notify(|e, dur: Duration| {
                warn!(key, error = %e, "Upload retrying in {:?}", dur);
            })
            .await
    }

    async fn pull(&self) -> Result<SyncOutcome, SyncError> {
        if !self.gateway.is_configured() {
            return Ok(SyncOutcome::SkippedNotConfigured);
        }

        let key = &self.settings.keys.primary;
        let path = self.db.path();
        let staged = files::staging_path(path, "download");
        let deadline = self.settings.transfer_timeout;

        let downloaded = match tokio::time::timeout(deadline, self.gateway.download(key, &staged))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout(deadline)),
        };
        match downloaded {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                files::discard(&staged).await;
                warn!(key, "Forced download found no remote copy; local database kept");
                return Ok(SyncOutcome::RemoteMissing);
            }
            Err(e) => {
                files::discard(&staged).await;
                warn!(key, error = %e, "Forced download failed; local database kept");
                return Ok(SyncOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        }

        if let Verdict::Corrupt(reason) = self.verifier.verify(&staged).await {
            files::discard(&staged).await;
            warn!(key, %reason, "Downloaded copy failed verification; local database kept");
            return Ok(SyncOutcome::SkippedCorrupt);
        }

        let fingerprint = match marker::fingerprint(&staged).await {
            Ok(fp) => fp,
            Err(e) => {
                files::discard(&staged).await;
                return Err(SyncError::local_io(&staged, e));
            }
        };
        if let Err(e) = self.db.replace_with(&staged).await {
            files::discard(&staged).await;
            return Err(e);
        }

        marker::record_transfer(&self.gateway, key, path, fingerprint).await;
        info!(key, path = %path.display(), "Local database replaced with remote copy");
        Ok(SyncOutcome::Downloaded)
    }
}

pub async fn spawn(args: SyncWorkerArgs) -> Result<SyncWorkerHandle, SyncError> {
    let (actor, _jh) = Actor::spawn(None, SyncWorker, args)
        .await
        .map_err(|e| SyncError::Actor(format!("failed to spawn SyncWorker: {e}")))?;
    Ok(SyncWorkerHandle { actor })
}
