use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;

use super::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Guards `/api/v1` with the `X-API-Key` header.
/// With no `api.key` configured every request passes.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.settings.api.key.as_deref() {
        verify_api_key(req.headers(), expected)?;
    }
    Ok(next.run(req).await)
}

fn verify_api_key(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if key == expected => Ok(()),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(AppError::Unauthorized("invalid API key".to_string()))
        }
        None => Err(AppError::Unauthorized(format!(
            "missing {} header",
            API_KEY_HEADER
        ))),
    }
}
