//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::redis::CircuitState;

use super::{
    BROADCASTS_TOTAL, BROADCAST_LATENCY, CHANNELS_CLOSED_TOTAL, CHANNELS_OPEN,
    CHANNELS_OPENED_TOTAL, CHANNELS_REJECTED_TOTAL, CHANNEL_DURATION, DELIVERIES_TOTAL,
    MESSAGES_REJECTED_TOTAL, MESSAGES_ROUTED_TOTAL, REDIS_CIRCUIT_STATE, REGISTRY_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CHANNELS_OPENED_TOTAL.inc();
        CHANNELS_OPEN.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        CHANNELS_CLOSED_TOTAL.inc();
        CHANNELS_OPEN.dec();
        CHANNEL_DURATION.observe(duration_secs);
    }

    pub fn record_rejected() {
        CHANNELS_REJECTED_TOTAL.inc();
    }
}

pub struct RouteMetrics;

impl RouteMetrics {
    pub fn record_routed(route: &str) {
        MESSAGES_ROUTED_TOTAL.with_label_values(&[route]).inc();
    }

    pub fn record_unknown_route() {
        MESSAGES_REJECTED_TOTAL
            .with_label_values(&["unknown_route"])
            .inc();
    }

    pub fn record_invalid() {
        MESSAGES_REJECTED_TOTAL.with_label_values(&["invalid"]).inc();
    }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_broadcast(latency_secs: f64) {
        BROADCASTS_TOTAL.inc();
        BROADCAST_LATENCY.observe(latency_secs);
    }

    pub fn record_outcomes(
        delivered: u64,
        stale_removed: u64,
        transient_failed: u64,
        owned_elsewhere: u64,
    ) {
        DELIVERIES_TOTAL
            .with_label_values(&["delivered"])
            .inc_by(delivered);
        DELIVERIES_TOTAL
            .with_label_values(&["stale_removed"])
            .inc_by(stale_removed);
        DELIVERIES_TOTAL
            .with_label_values(&["transient_failed"])
            .inc_by(transient_failed);
        DELIVERIES_TOTAL
            .with_label_values(&["owned_elsewhere"])
            .inc_by(owned_elsewhere);
    }
}

pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn record_error(operation: &str) {
        REGISTRY_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn set_circuit_state(state: CircuitState) {
        REDIS_CIRCUIT_STATE.set(state as i64);
    }
}
