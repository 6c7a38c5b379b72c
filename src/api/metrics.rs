//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{encode_metrics, RegistryMetrics};
use crate::server::AppState;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics - Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    // Gauges sampled at scrape time
    if let Some(pool) = &state.redis_pool {
        RegistryMetrics::set_circuit_state(pool.circuit_state());
    }

    match encode_metrics() {
        Ok(output) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
