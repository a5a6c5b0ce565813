use super::{
    bootstrap::BootstrapOutcome,
    reconcile::{ReconcileReport, SyncDecision},
    worker::SyncOutcome,
};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    WriteCommitted,
    ManualUpload,
    ManualDownload,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRecord {
    pub trigger: SyncTrigger,
    pub outcome: SyncOutcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupSummary {
    pub decision: SyncDecision,
    pub transferred: bool,
    pub bootstrap: Option<BootstrapOutcome>,
    pub bootstrap_attempts: usize,
    pub at: DateTime<Utc>,
}

impl From<&ReconcileReport> for StartupSummary {
    fn from(report: &ReconcileReport) -> Self {
        Self {
            decision: report.decision,
            transferred: report.transferred,
            bootstrap: report.bootstrap.as_ref().map(|b| b.outcome),
            bootstrap_attempts: report.bootstrap.as_ref().map_or(0, |b| b.attempts.len()),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub startup: Option<StartupSummary>,
    pub last_sync: Option<SyncRecord>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Last known sync outcomes, so prolonged failure is visible even though no request fails.
#[derive(Debug, Default)]
pub struct SyncStatus {
    inner: Mutex<StatusSnapshot>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_startup(&self, report: &ReconcileReport) {
        let summary = StartupSummary::from(report);
        self.update(|s| {
            if summary.transferred {
                s.last_success_at = Some(summary.at);
            }
            if summary.bootstrap == Some(BootstrapOutcome::Exhausted) {
                s.consecutive_failures += 1;
            }
            s.startup = Some(summary);
        });
    }

    pub fn record(&self, trigger: SyncTrigger, result: &Result<SyncOutcome, SyncError>) {
        let at = Utc::now();
        let outcome = match result {
            Ok(outcome) => outcome.clone(),
            Err(e) => SyncOutcome::Failed {
                reason: e.to_string(),
            },
        };
        self.update(|s| {
            match &outcome {
                SyncOutcome::Uploaded | SyncOutcome::Downloaded => {
                    s.last_success_at = Some(at);
                    s.consecutive_failures = 0;
                }
                SyncOutcome::Failed { .. } | SyncOutcome::SkippedCorrupt => {
                    s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                }
                SyncOutcome::SkippedNotConfigured | SyncOutcome::RemoteMissing => {}
            }
            s.last_sync = Some(SyncRecord {
                trigger,
                outcome,
                at,
            });
        });
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}
