use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error as ThisError;

use super::StoreError;

#[derive(Debug, ThisError)]
pub enum SyncError {
    #[error("Local database IO error at {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sync worker error: {0}")]
    Actor(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            SyncError::LocalIo { .. }
            | SyncError::Database(_)
            | SyncError::Actor(_)
            | SyncError::Json(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorObject {
                    code: "LOCAL_STORAGE_ERROR".to_string(),
                    message: "The local database could not be read or written.".to_string(),
                },
            ),
            SyncError::Store(StoreError::NotConfigured) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorObject {
                    code: "REMOTE_NOT_CONFIGURED".to_string(),
                    message: "No remote object store is configured.".to_string(),
                },
            ),
            SyncError::Store(_) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "REMOTE_ERROR".to_string(),
                    message: "The remote object store could not be reached.".to_string(),
                },
            ),
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}
