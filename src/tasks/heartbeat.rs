use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;

use crate::registry::{ConnectionId, ConnectionRegistry, InstanceId};
use crate::transport::LocalTransport;

/// Maximum concurrent refreshes per round
const MAX_CONCURRENT_REFRESHES: usize = 100;

/// Keeps the registry entries of this process's open channels alive.
///
/// Expiring entries (Redis with a TTL) are refreshed every `interval`. An
/// entry that expired while its channel was still attached is written
/// again.
pub struct RegistryHeartbeat {
    registry: Arc<dyn ConnectionRegistry>,
    transport: Arc<LocalTransport>,
    instance: InstanceId,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

/// Outcome counts of one refresh round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRound {
    pub refreshed: usize,
    pub restored: usize,
    pub failed: usize,
}

enum Refresh {
    Refreshed,
    Restored,
    Skipped,
    Failed,
}

impl RegistryHeartbeat {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        transport: Arc<LocalTransport>,
        instance: InstanceId,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            transport,
            instance,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            instance_id = %self.instance,
            "Registry heartbeat started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Registry heartbeat received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.refresh_all().await;
                }
            }
        }

        tracing::info!("Registry heartbeat stopped");
    }

    /// Refresh the entry of every locally attached channel once
    pub async fn refresh_all(&self) -> RefreshRound {
        let ids = self.transport.attached_ids();
        let mut round = RefreshRound::default();
        if ids.is_empty() {
            return round;
        }

        let start = Instant::now();
        for batch in ids.chunks(MAX_CONCURRENT_REFRESHES) {
            let results = join_all(batch.iter().map(|id| self.refresh_one(id))).await;
            for result in results {
                match result {
                    Refresh::Refreshed => round.refreshed += 1,
                    Refresh::Restored => round.restored += 1,
                    Refresh::Failed => round.failed += 1,
                    Refresh::Skipped => {}
                }
            }
        }

        tracing::debug!(
            refreshed = round.refreshed,
            restored = round.restored,
            failed = round.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Registry heartbeat round completed"
        );
        if round.restored > 0 {
            tracing::warn!(
                restored = round.restored,
                "Re-registered open channels whose entries had expired"
            );
        }

        round
    }

    async fn refresh_one(&self, id: &ConnectionId) -> Refresh {
        match self.registry.refresh(id).await {
            Ok(true) => Refresh::Refreshed,
            // Closed since the snapshot was taken
            Ok(false) if !self.transport.is_attached(id) => Refresh::Skipped,
            Ok(false) => match self.registry.add(id, &self.instance).await {
                Ok(_) => Refresh::Restored,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Failed to restore entry");
                    Refresh::Failed
                }
            },
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Failed to refresh entry");
                Refresh::Failed
            }
        }
    }
}
