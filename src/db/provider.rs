use super::handle::Database;
use crate::config::Config;
use crate::error::SyncError;
use crate::store::Gateway;
use crate::sync::{
    Reconciler, StartupSummary, SyncOutcome, SyncRecord, SyncSettings, SyncStatus,
    SyncWorkerHandle,
    worker::{self, SyncWorkerArgs},
};
use crate::utils::logging::with_pretty_json_debug;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Uninitialized,
    Reconciling,
    Ready,
}

impl ProviderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProviderState::Reconciling,
            2 => ProviderState::Ready,
            _ => ProviderState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProviderState::Uninitialized => 0,
            ProviderState::Reconciling => 1,
            ProviderState::Ready => 2,
        }
    }
}

/// Operator-facing view of the subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub remote_configured: bool,
    pub remote_target: Option<String>,
    pub database_path: PathBuf,
    pub provider_state: ProviderState,
    pub startup: Option<StartupSummary>,
    pub last_sync: Option<SyncRecord>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

struct Ready {
    db: Arc<Database>,
    worker: SyncWorkerHandle,
}

/// Hands out the database handle, reconciling with the remote copy exactly once first.
///
/// Every caller of [`DatabaseProvider::get_handle`] awaits the same initialization; none
/// of them gets a handle before reconciliation (and bootstrap, if needed) has settled.
pub struct DatabaseProvider {
    settings: SyncSettings,
    gateway: Gateway,
    schema: Option<Arc<str>>,
    state: AtomicU8,
    ready: OnceCell<Ready>,
    status: Arc<SyncStatus>,
}

impl DatabaseProvider {
    pub fn new(settings: SyncSettings, gateway: Gateway) -> Self {
        Self {
            settings,
            gateway,
            schema: None,
            state: AtomicU8::new(ProviderState::Uninitialized.as_u8()),
            ready: OnceCell::new(),
            status: Arc::new(SyncStatus::new()),
        }
    }

    /// A misconfigured remote is logged and treated as not configured.
    pub fn from_config(cfg: &Config) -> Self {
        let gateway = Gateway::from_config(&cfg.remote).unwrap_or_else(|e| {
            error!(error = %e, "Remote object store misconfigured; running local-only");
            Gateway::unconfigured()
        });
        Self::new(SyncSettings::from_config(cfg), gateway)
    }

    /// DDL applied on every open; use `CREATE ... IF NOT EXISTS`.
    pub fn with_schema(mut self, script: impl Into<Arc<str>>) -> Self {
        self.schema = Some(script.into());
        self
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_remote_configured(&self) -> bool {
        self.gateway.is_configured()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub async fn get_handle(&self) -> Result<Arc<Database>, SyncError> {
        Ok(self.ready().await?.db.clone())
    }

    /// Call after a logically complete write. Remote failures come back as
    /// [`SyncOutcome::Failed`], never as an error.
    pub async fn notify_write_committed(&self) -> Result<SyncOutcome, SyncError> {
        self.ready().await?.worker.write_committed().await
    }

    pub async fn force_upload(&self) -> Result<SyncOutcome, SyncError> {
        self.ready().await?.worker.force_upload().await
    }

    pub async fn force_download(&self) -> Result<SyncOutcome, SyncError> {
        self.ready().await?.worker.force_download().await
    }

    pub fn status(&self) -> StatusReport {
        let snapshot = self.status.snapshot();
        StatusReport {
            remote_configured: self.gateway.is_configured(),
            remote_target: self.gateway.describe(),
            database_path: self.settings.database_path.clone(),
            provider_state: self.state(),
            startup: snapshot.startup,
            last_sync: snapshot.last_sync,
            last_success_at: snapshot.last_success_at,
            consecutive_failures: snapshot.consecutive_failures,
        }
    }

    /// Stops the sync worker and closes the pool. No-op before initialization.
    pub async fn close(&self) {
        if let Some(ready) = self.ready.get() {
            ready.worker.stop();
            ready.db.close().await;
            debug!(path = %self.settings.database_path.display(), "DatabaseProvider closed");
        }
    }

    async fn ready(&self) -> Result<&Ready, SyncError> {
        self.ready.get_or_try_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> Result<Ready, SyncError> {
        self.set_state(ProviderState::Reconciling);
        match self.try_initialize().await {
            Ok(ready) => {
                self.set_state(ProviderState::Ready);
                let status = self.status();
                info!(
                    path = %status.database_path.display(),
                    remote_configured = status.remote_configured,
                    "Database ready"
                );
                with_pretty_json_debug(&status, |pretty| {
                    debug!(status = %pretty, "Startup status");
                });
                Ok(ready)
            }
            Err(e) => {
                self.set_state(ProviderState::Uninitialized);
                error!(
                    path = %self.settings.database_path.display(),
                    error = %e,
                    "Database initialization failed; the next call retries"
                );
                Err(e)
            }
        }
    }

    async fn try_initialize(&self) -> Result<Ready, SyncError> {
        let report = Reconciler::new(self.gateway.clone(), self.settings.clone())
            .run()
            .await?;
        self.status.record_startup(&report);

        let db = Arc::new(
            Database::open(
                self.settings.database_path.clone(),
                self.settings.database.clone(),
                self.schema.clone(),
            )
            .await?,
        );
        let worker = worker::spawn(SyncWorkerArgs {
            db: db.clone(),
            gateway: self.gateway.clone(),
            settings: self.settings.clone(),
            status: self.status.clone(),
        })
        .await?;
        Ok(Ready { db, worker })
    }

    fn set_state(&self, state: ProviderState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

static GLOBAL: OnceLock<Arc<DatabaseProvider>> = OnceLock::new();

/// The process-wide provider, built from [`crate::config::CONFIG`] unless one was installed first.
pub fn global() -> Arc<DatabaseProvider> {
    GLOBAL
        .get_or_init(|| Arc::new(DatabaseProvider::from_config(&crate::config::CONFIG)))
        .clone()
}

/// Installs `provider` as the process-wide provider. Hands it back if one exists already.
pub fn install(provider: Arc<DatabaseProvider>) -> Result<(), Arc<DatabaseProvider>> {
    GLOBAL.set(provider).inspect_err(|_| {
        warn!("A global DatabaseProvider is already installed");
    })
}
