//! Registry inspection endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use futures::TryStreamExt;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::registry::{Connection, ConnectionId};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionId>,
    pub total: usize,
}

/// GET /api/v1/connections - every registered id
pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<ConnectionListResponse>> {
    let mut connections: Vec<ConnectionId> = state.registry.list_all().try_collect().await?;
    connections.sort();
    connections.dedup();

    Ok(Json(ConnectionListResponse {
        total: connections.len(),
        connections,
    }))
}

/// GET /api/v1/connections/{id}
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Connection>> {
    let id = ConnectionId::from(id);
    match state.registry.get(&id).await? {
        Some(connection) => Ok(Json(connection)),
        None => Err(AppError::NotFound(format!("Connection '{}' not found", id))),
    }
}
