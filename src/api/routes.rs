use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::broadcast::broadcast;
use super::connections::{get_connection, list_connections};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

/// Unauthenticated operational endpoints
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Endpoints served under `/api/v1`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/connections", get(list_connections))
        .route("/connections/{id}", get(get_connection))
}
