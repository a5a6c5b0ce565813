use crate::db::{ProviderState, StatusReport};
use crate::error::SyncError;
use crate::server::router::AdminState;
use crate::sync::SyncOutcome;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub async fn healthz(State(state): State<AdminState>) -> Response {
    let provider_state = state.provider.state();
    let code = if provider_state == ProviderState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "state": provider_state }))).into_response()
}

pub async fn sync_status(State(state): State<AdminState>) -> Json<StatusReport> {
    Json(state.provider.status())
}

pub async fn sync_upload(State(state): State<AdminState>) -> Result<Response, SyncError> {
    let outcome = state.provider.force_upload().await?;
    Ok(outcome_response(outcome))
}

pub async fn sync_download(State(state): State<AdminState>) -> Result<Response, SyncError> {
    let outcome = state.provider.force_download().await?;
    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: SyncOutcome) -> Response {
    let code = match &outcome {
        SyncOutcome::Uploaded | SyncOutcome::Downloaded | SyncOutcome::SkippedNotConfigured => {
            StatusCode::OK
        }
        SyncOutcome::SkippedCorrupt => StatusCode::CONFLICT,
        SyncOutcome::RemoteMissing => StatusCode::NOT_FOUND,
        SyncOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
    };
    (code, Json(outcome)).into_response()
}
