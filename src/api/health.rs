//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::dispatcher::DispatcherStatsSnapshot;
use crate::redis::{CircuitState, RedisHealthSnapshot};
use crate::registry::InstanceId;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub instance_id: InstanceId,
    pub registry: RegistryHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub local_channels: usize,
}

#[derive(Debug, Serialize)]
pub struct RegistryHealthResponse {
    pub backend: String,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    #[serde(flatten)]
    pub connection: RedisHealthSnapshot,
    pub circuit_breaker_state: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub local_channels: usize,
    pub dispatcher: DispatcherStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match state.registry.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Registry health check failed");
            false
        }
    };

    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        connection: pool.health().snapshot(),
        circuit_breaker_state: pool.circuit_state(),
    });

    let status = if state.is_draining() {
        "draining"
    } else if reachable {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        instance_id: state.instance_id.clone(),
        registry: RegistryHealthResponse {
            backend: state.registry.backend_name().to_string(),
            reachable,
        },
        redis,
        local_channels: state.transport.len(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        local_channels: state.transport.len(),
        dispatcher: state.dispatcher.stats(),
    })
}
