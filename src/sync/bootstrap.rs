use super::{
    files,
    integrity::{IntegrityVerifier, Verdict},
    marker,
};
use crate::error::{StoreError, SyncError};
use crate::store::Gateway;
use serde::Serialize;
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

/// Retry bounds for recovering the remote copy when the local disk is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl BootstrapPolicy {
    /// Upper bound on how long [`BootstrapGuard::run`] can hold the caller when the remote
    /// is permanently unreachable.
    pub fn worst_case(&self) -> Duration {
        (self.attempt_timeout + self.retry_delay) * self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Recovered,
    RemoteAbsent,
    TimedOut,
    TransportFailure(String),
    CorruptPayload(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapAttemptRecord {
    pub attempt: u32,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// The remote copy was downloaded, verified and promoted to the local path.
    Recovered,
    /// The remote store has no copy; a fresh database is expected.
    RemoteAbsent,
    /// Every attempt failed. The process continues with a fresh, empty database.
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub outcome: BootstrapOutcome,
    pub attempts: Vec<BootstrapAttemptRecord>,
}

/// Recovers the remote copy when no local database exists, holding the caller until the
/// copy is in place or every attempt has failed.
///
/// Serving requests against an empty database while a recoverable copy exists would let the
/// application overwrite the remote history on its next write-sync, so the wait is the point.
pub struct BootstrapGuard<'a> {
    gateway: &'a Gateway,
    verifier: &'a IntegrityVerifier,
    policy: &'a BootstrapPolicy,
}

impl<'a> BootstrapGuard<'a> {
    pub fn new(
        gateway: &'a Gateway,
        verifier: &'a IntegrityVerifier,
        policy: &'a BootstrapPolicy,
    ) -> Self {
        Self {
            gateway,
            verifier,
            policy,
        }
    }

    /// Only a failure to move the verified copy into place is returned as an error.
    pub async fn run(&self, key: &str, target: &Path) -> Result<BootstrapReport, SyncError> {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let attempt_started = Instant::now();
            let outcome = self.attempt(key, target).await?;
            let record = BootstrapAttemptRecord {
                attempt,
                elapsed: attempt_started.elapsed(),
                outcome: outcome.clone(),
            };
            let elapsed_ms = u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX);
            attempts.push(record);

            match outcome {
                AttemptOutcome::Recovered => {
                    info!(
                        key,
                        path = %target.display(),
                        attempt,
                        elapsed_ms,
                        "Bootstrap recovered the remote database"
                    );
                    return Ok(BootstrapReport {
                        outcome: BootstrapOutcome::Recovered,
                        attempts,
                    });
                }
                AttemptOutcome::RemoteAbsent => {
                    info!(key, attempt, "Bootstrap found no remote copy; starting fresh");
                    return Ok(BootstrapReport {
                        outcome: BootstrapOutcome::RemoteAbsent,
                        attempts,
                    });
                }
                AttemptOutcome::TimedOut
                | AttemptOutcome::TransportFailure(_)
                | AttemptOutcome::CorruptPayload(_) => {
                    warn!(
                        key,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        outcome = ?outcome,
                        "Bootstrap attempt failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        error!(
            key,
            path = %target.display(),
            attempts = attempts.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "BOOTSTRAP EXHAUSTED: the remote database could not be recovered and the process is \
             continuing with a FRESH, EMPTY database. The remote object is untouched until the \
             next write-sync overwrites it. Stop writes now, restore connectivity, then trigger a \
             forced download (POST /admin/sync/download) or restart; the backup object holds the \
             previous upload as well."
        );
        Ok(BootstrapReport {
            outcome: BootstrapOutcome::Exhausted,
            attempts,
        })
    }

    async fn attempt(&self, key: &str, target: &Path) -> Result<AttemptOutcome, SyncError> {
        let staged = files::staging_path(target, "bootstrap");
        let deadline = self.policy.attempt_timeout;

        let downloaded = match tokio::time::timeout(deadline, self.gateway.download(key, &staged))
            .await
        {
            Err(_) => Err(AttemptOutcome::TimedOut),
            Ok(Err(StoreError::NotFound(_) | StoreError::NotConfigured)) => {
                Err(AttemptOutcome::RemoteAbsent)
            }
            Ok(Err(e)) => Err(AttemptOutcome::TransportFailure(e.to_string())),
            Ok(Ok(())) => Ok(()),
        };
        if let Err(outcome) = downloaded {
            files::discard(&staged).await;
            return Ok(outcome);
        }

        if let Verdict::Corrupt(reason) = self.verifier.verify(&staged).await {
            files::discard(&staged).await;
            return Ok(AttemptOutcome::CorruptPayload(reason));
        }

        let transferred = match marker::fingerprint(&staged).await {
            Ok(fp) => fp,
            Err(e) => {
                files::discard(&staged).await;
                return Err(SyncError::local_io(&staged, e));
            }
        };
        if let Err(e) = files::promote(&staged, target).await {
            files::discard(&staged).await;
            return Err(e);
        }
        marker::record_transfer(self.gateway, key, target, transferred).await;
        Ok(AttemptOutcome::Recovered)
    }
}
