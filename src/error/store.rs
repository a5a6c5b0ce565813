use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error as ThisError;

use super::IsRetryable;

/// Failure talking to the remote object store.
///
/// Gateway operations never panic or bubble transport errors as anything else; callers
/// inspect the variant (or [`IsRetryable`]) to decide between retrying and falling back to
/// local-only operation.
#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("Remote object store is not configured")]
    NotConfigured,

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store returned status {status} for {key}")]
    Status { key: String, status: StatusCode },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid object metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl IsRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Http(_) | StoreError::Io(_) | StoreError::Timeout(_) => true,
            StoreError::Status { status, .. } => {
                status.is_server_error()
                    || matches!(
                        *status,
                        StatusCode::TOO_MANY_REQUESTS
                            | StatusCode::REQUEST_TIMEOUT
                            | StatusCode::UNAUTHORIZED
                            | StatusCode::FORBIDDEN
                    )
            }
            StoreError::NotConfigured
            | StoreError::NotFound(_)
            | StoreError::InvalidMetadata(_)
            | StoreError::InvalidKey(_) => false,
        }
    }
}
