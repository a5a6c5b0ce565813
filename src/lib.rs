//! Keeps a local SQLite file on ephemeral disk in sync with a copy in an object store.
//!
//! Entry points for the application live at the crate root and delegate to the
//! process-wide [`DatabaseProvider`]:
//! - [`get_handle`]: the database, after startup reconciliation has settled
//! - [`notify_write_committed`]: push the committed state to the remote
//! - [`force_upload`] / [`force_download`]: operator-triggered transfers
//! - [`is_remote_configured`] and [`status`]: for status displays

pub mod config;
pub mod db;
pub mod error;
pub mod server;
pub mod store;
pub mod sync;
pub mod utils;

use std::sync::Arc;

pub use db::{Database, DatabaseProvider, StatusReport, global, install};
pub use error::{StoreError, SyncError};
pub use sync::SyncOutcome;

pub async fn get_handle() -> Result<Arc<Database>, SyncError> {
    global().get_handle().await
}

pub async fn notify_write_committed() -> Result<SyncOutcome, SyncError> {
    global().notify_write_committed().await
}

pub fn is_remote_configured() -> bool {
    global().is_remote_configured()
}

pub async fn force_upload() -> Result<SyncOutcome, SyncError> {
    global().force_upload().await
}

pub async fn force_download() -> Result<SyncOutcome, SyncError> {
    global().force_download().await
}

pub fn status() -> StatusReport {
    global().status()
}
