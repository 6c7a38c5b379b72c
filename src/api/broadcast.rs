//! Server-originated broadcast.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::BroadcastSummary;
use crate::error::{AppError, Result};
use crate::server::AppState;

/// Route name carried in the envelope of broadcasts made over HTTP
pub const API_ROUTE: &str = "api";

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    #[serde(flatten)]
    pub summary: BroadcastSummary,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/v1/broadcast - deliver any JSON body to every registered channel
#[tracing::instrument(name = "http.broadcast", skip(state, body))]
pub async fn broadcast(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<BroadcastResponse>> {
    let Json(body) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let summary = state.gateway.broadcast(API_ROUTE, None, body).await?;

    Ok(Json(BroadcastResponse {
        summary,
        timestamp: Utc::now(),
    }))
}
