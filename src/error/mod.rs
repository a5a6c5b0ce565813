mod store;
mod sync;

pub use store::StoreError;
pub use sync::{ApiErrorBody, ApiErrorObject, SyncError};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
