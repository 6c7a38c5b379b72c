use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;

use crate::config::DispatchConfig;
use crate::metrics::DeliveryMetrics;
use crate::registry::{ConnectionId, ConnectionRegistry, InstanceId};
use crate::transport::{DeliveryError, DeliveryTransport, Payload};

use super::types::{
    BroadcastSummary, DispatchError, DispatcherStats, DispatcherStatsSnapshot, TargetOutcome,
    TargetResult,
};

/// Delivers a payload to every registered channel.
///
/// Targets are delivered as the registry scan yields them, with at most
/// `max_concurrent` attempts in flight and an individual timeout per
/// attempt. The summary is returned once every attempt has finished.
///
/// The transport only reaches channels of this process (`instance`). A
/// target it cannot reach is removed only if its entry is not owned by
/// another process.
pub struct FanoutDispatcher {
    registry: Arc<dyn ConnectionRegistry>,
    transport: Arc<dyn DeliveryTransport>,
    instance: InstanceId,
    delivery_timeout: Duration,
    max_concurrent: usize,
    stats: DispatcherStats,
}

impl FanoutDispatcher {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        transport: Arc<dyn DeliveryTransport>,
        instance: InstanceId,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            instance,
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
            max_concurrent: config.max_concurrent_deliveries.max(1),
            stats: DispatcherStats::default(),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Attempt delivery of `payload` to every id in the registry.
    ///
    /// Stale targets are removed from the registry and reported as
    /// `StaleRemoved`; targets owned by another process are reported as
    /// `OwnedElsewhere` and kept. Only a registry read failure fails the call, and
    /// only after in-flight attempts have completed.
    #[tracing::instrument(name = "dispatcher.broadcast", skip(self, payload), fields(payload_bytes = payload.len()))]
    pub async fn broadcast(&self, payload: Payload) -> Result<BroadcastSummary, DispatchError> {
        let start = Instant::now();
        let mut ids = self.registry.list_all();
        let mut seen: HashSet<ConnectionId> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut summary = BroadcastSummary::default();
        let mut scan_error = None;
        let mut scanning = true;

        while scanning || !in_flight.is_empty() {
            tokio::select! {
                next = ids.next(), if scanning && in_flight.len() < self.max_concurrent => {
                    match next {
                        Some(Ok(id)) => {
                            // SCAN may repeat keys; deliver once per broadcast
                            if seen.insert(id.clone()) {
                                in_flight.push(self.deliver_one(id, payload.clone()));
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Registry scan failed during broadcast");
                            scan_error = Some(e);
                            scanning = false;
                        }
                        None => scanning = false,
                    }
                }
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    summary.record(result);
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.record(&summary);
        DeliveryMetrics::record_broadcast(elapsed);
        DeliveryMetrics::record_outcomes(
            summary.delivered as u64,
            summary.stale_removed as u64,
            summary.transient_failed as u64,
            summary.owned_elsewhere as u64,
        );

        tracing::debug!(
            delivered = summary.delivered,
            stale_removed = summary.stale_removed,
            transient_failed = summary.transient_failed,
            owned_elsewhere = summary.owned_elsewhere,
            elapsed_secs = elapsed,
            "Broadcast finished"
        );

        match scan_error {
            Some(e) => {
                self.stats.scan_failures.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::StorageUnavailable(e))
            }
            None => Ok(summary),
        }
    }

    async fn deliver_one(&self, id: ConnectionId, payload: Payload) -> TargetResult {
        let outcome = match timeout(self.delivery_timeout, self.transport.deliver(&id, payload)).await {
            Ok(Ok(())) => TargetOutcome::Delivered,
            Ok(Err(DeliveryError::Stale)) => self.unreachable(&id).await,
            Ok(Err(DeliveryError::Transient(reason))) => {
                tracing::debug!(connection_id = %id, reason = %reason, "Transient delivery failure");
                TargetOutcome::TransientFailed { reason }
            }
            Err(_) => {
                tracing::debug!(connection_id = %id, "Delivery timed out");
                TargetOutcome::TransientFailed {
                    reason: format!(
                        "delivery timed out after {}ms",
                        self.delivery_timeout.as_millis()
                    ),
                }
            }
        };

        TargetResult {
            connection_id: id,
            outcome,
        }
    }

    /// Classify a target the transport could not reach. Only entries owned
    /// by this process (or by nobody) are removed.
    async fn unreachable(&self, id: &ConnectionId) -> TargetOutcome {
        match self.registry.get(id).await {
            Ok(Some(entry)) if entry.is_owned_elsewhere(&self.instance) => {
                tracing::trace!(
                    connection_id = %id,
                    owner = ?entry.owner,
                    "Target owned by another instance"
                );
                TargetOutcome::OwnedElsewhere
            }
            // Already gone, e.g. closed while the broadcast was running
            Ok(None) => TargetOutcome::StaleRemoved,
            Ok(Some(_)) => {
                // Lazy cleanup; a failed remove is retried by the next broadcast
                if let Err(e) = self.registry.remove(id).await {
                    tracing::warn!(
                        connection_id = %id,
                        error = %e,
                        "Failed to remove stale connection"
                    );
                } else {
                    tracing::debug!(connection_id = %id, "Removed stale connection");
                }
                TargetOutcome::StaleRemoved
            }
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Owner lookup failed");
                TargetOutcome::TransientFailed {
                    reason: format!("owner lookup failed: {e}"),
                }
            }
        }
    }
}
