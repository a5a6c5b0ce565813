use crate::server::router::AdminState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(k) = headers.get("x-admin-key").and_then(|v| v.to_str().ok()) {
        return Some(k.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

#[derive(Debug, Clone, Copy)]
pub struct RequireAdminKey;

impl FromRequestParts<AdminState> for RequireAdminKey {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AdminState,
    ) -> Result<Self, Self::Rejection> {
        match extract_header_token(&parts.headers) {
            Some(key) => {
                let expected = state.admin_key.as_ref();
                if !expected.is_empty() && bool::from(key.as_bytes().ct_eq(expected.as_bytes())) {
                    Ok(RequireAdminKey)
                } else {
                    Err(AuthError::InvalidKey)
                }
            }
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let reason = match self {
            AuthError::MissingKey => "Missing admin key",
            AuthError::InvalidKey => "Invalid admin key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
