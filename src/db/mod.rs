//! The local database: one pooled handle per process, opened only after startup reconciliation.
//!
//! Layout:
//! - `handle.rs`: pool, prepared-statement cache, checkpoint, snapshots and in-place file replacement
//! - `provider.rs`: once-only initialization, sync entry points and the process-wide instance
//! - `schema.rs`: DDL application for fresh databases

pub mod handle;
pub mod provider;
pub mod schema;

pub use handle::{Database, DatabaseSettings, checkpoint_path};
pub use provider::{DatabaseProvider, ProviderState, StatusReport, global, install};
pub use schema::apply_schema;
