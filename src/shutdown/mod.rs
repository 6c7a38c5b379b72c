//! Graceful shutdown of the gateway.
//!
//! 0. Stop accepting channels (`draining` flag, checked by the WebSocket
//!    handler before the upgrade and again once a channel is registered)
//! 1. Tell every locally attached channel the server is going away
//! 2. Detach their outbound queues, which ends each socket's send task
//! 3. Deregister those ids so a shared registry does not keep entries
//!    pointing at this process

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;

use crate::gateway::ServerMessage;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::transport::LocalTransport;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on deregistering local channels (default: 5 seconds)
    pub deregister_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deregister_timeout: Duration::from_secs(5),
        }
    }
}

pub struct GracefulShutdown {
    registry: Arc<dyn ConnectionRegistry>,
    transport: Arc<LocalTransport>,
    draining: Arc<AtomicBool>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        transport: Arc<LocalTransport>,
        draining: Arc<AtomicBool>,
    ) -> Self {
        Self::with_config(registry, transport, draining, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn ConnectionRegistry>,
        transport: Arc<LocalTransport>,
        draining: Arc<AtomicBool>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            draining,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(local_channels = self.transport.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(
            reason = %reason,
            "Starting graceful shutdown - Phase 0: Refusing new channels"
        );
        self.draining.store(true, Ordering::SeqCst);

        tracing::info!("Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason);

        tracing::info!("Phase 2: Detaching local channels");
        let ids = self.transport.detach_all();
        result.channels_detached = ids.len();

        tracing::info!("Phase 3: Deregistering local channels");
        let (deregistered, complete) = self.deregister(ids).await;
        result.deregistered = deregistered;

        result.duration = start.elapsed();
        result.success = complete;

        tracing::info!(
            clients_notified = result.clients_notified,
            channels_detached = result.channels_detached,
            deregistered = result.deregistered,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Queue a shutdown frame on every attached channel without waiting on
    /// full queues
    fn notify_clients(&self, reason: &str) -> usize {
        let payload = match (ServerMessage::Shutdown {
            reason: reason.to_string(),
        })
        .to_payload()
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize shutdown notice");
                return 0;
            }
        };

        self.transport
            .attached_ids()
            .iter()
            .filter(|id| self.transport.try_send(id, payload.clone()))
            .count()
    }

    /// Returns the number removed and whether every removal finished in time
    async fn deregister(&self, ids: Vec<ConnectionId>) -> (usize, bool) {
        if ids.is_empty() {
            return (0, true);
        }

        let mut removals: FuturesUnordered<_> = ids
            .into_iter()
            .map(|id| {
                let registry = self.registry.clone();
                async move {
                    match registry.remove(&id).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(
                                connection_id = %id,
                                error = %e,
                                "Failed to deregister channel during shutdown"
                            );
                            false
                        }
                    }
                }
            })
            .collect();

        let mut removed = 0;
        let drain = async {
            while let Some(ok) = removals.next().await {
                if ok {
                    removed += 1;
                }
            }
        };

        let complete = match timeout(self.config.deregister_timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Deregistration timed out, remaining entries will be cleaned lazily");
                false
            }
        };

        (removed, complete)
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Every deregistration finished within the timeout
    pub success: bool,
    pub clients_notified: usize,
    pub channels_detached: usize,
    pub deregistered: usize,
    pub duration: Duration,
}
