//! Prometheus metrics for the relay.
//!
//! - Channel lifecycle (opened, closed, rejected, currently open)
//! - Inbound routing (messages per route, unknown routes, invalid frames)
//! - Fan-out (broadcasts, per-target outcomes, broadcast latency)
//! - Registry store errors

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, DeliveryMetrics, RegistryMetrics, RouteMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "wsrelay";

lazy_static! {
    // ============================================================================
    // Channel Metrics
    // ============================================================================

    /// Channels currently open on this process
    pub static ref CHANNELS_OPEN: IntGauge = register_int_gauge!(
        format!("{}_channels_open", METRIC_PREFIX),
        "Number of WebSocket channels currently open on this process"
    ).unwrap();

    pub static ref CHANNELS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channels_opened_total", METRIC_PREFIX),
        "Total channels opened and registered"
    ).unwrap();

    pub static ref CHANNELS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channels_closed_total", METRIC_PREFIX),
        "Total channels closed"
    ).unwrap();

    /// Channel opens refused because the registry could not record them
    pub static ref CHANNELS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channels_rejected_total", METRIC_PREFIX),
        "Total channel opens rejected"
    ).unwrap();

    pub static ref CHANNEL_DURATION: Histogram = register_histogram!(
        format!("{}_channel_duration_seconds", METRIC_PREFIX),
        "Lifetime of WebSocket channels in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Routing Metrics
    // ============================================================================

    pub static ref MESSAGES_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Inbound messages dispatched to a route",
        &["route"]
    ).unwrap();

    pub static ref MESSAGES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_rejected_total", METRIC_PREFIX),
        "Inbound messages rejected before routing",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref BROADCASTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total fan-out broadcasts started"
    ).unwrap();

    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Per-target delivery outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref BROADCAST_LATENCY: Histogram = register_histogram!(
        format!("{}_broadcast_latency_seconds", METRIC_PREFIX),
        "Time from registry scan start to last delivery completion",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Registry Metrics
    // ============================================================================

    pub static ref REGISTRY_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_registry_errors_total", METRIC_PREFIX),
        "Registry operations that failed with StorageUnavailable",
        &["operation"]
    ).unwrap();

    /// 0 = closed, 1 = open, 2 = half-open; absent without a Redis backend
    pub static ref REDIS_CIRCUIT_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_state", METRIC_PREFIX),
        "State of the Redis circuit breaker"
    ).unwrap();
}
