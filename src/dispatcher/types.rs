use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::registry::{ConnectionId, RegistryError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The registry could not be read; retryable by the caller
    #[error(transparent)]
    StorageUnavailable(#[from] RegistryError),

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

/// What happened to one target of a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Delivered,
    /// Transport reported the channel gone; its registry entry was removed
    StaleRemoved,
    /// Transport error or timeout; registry untouched
    TransientFailed { reason: String },
    /// Terminated by another process sharing the registry; not reachable
    /// from here and left in place
    OwnedElsewhere,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

/// Per-target results of one broadcast
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub stale_removed: usize,
    pub transient_failed: usize,
    pub owned_elsewhere: usize,
    pub targets: Vec<TargetResult>,
}

impl BroadcastSummary {
    pub(crate) fn record(&mut self, result: TargetResult) {
        match result.outcome {
            TargetOutcome::Delivered => self.delivered += 1,
            TargetOutcome::StaleRemoved => self.stale_removed += 1,
            TargetOutcome::TransientFailed { .. } => self.transient_failed += 1,
            TargetOutcome::OwnedElsewhere => self.owned_elsewhere += 1,
        }
        self.targets.push(result);
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn outcome_for(&self, id: &ConnectionId) -> Option<&TargetOutcome> {
        self.targets
            .iter()
            .find(|t| &t.connection_id == id)
            .map(|t| &t.outcome)
    }
}

/// Cumulative dispatcher counters
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub broadcasts: AtomicU64,
    pub delivered: AtomicU64,
    pub stale_removed: AtomicU64,
    pub transient_failed: AtomicU64,
    pub owned_elsewhere: AtomicU64,
    pub scan_failures: AtomicU64,
}

impl DispatcherStats {
    pub(crate) fn record(&self, summary: &BroadcastSummary) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(summary.delivered as u64, Ordering::Relaxed);
        self.stale_removed
            .fetch_add(summary.stale_removed as u64, Ordering::Relaxed);
        self.transient_failed
            .fetch_add(summary.transient_failed as u64, Ordering::Relaxed);
        self.owned_elsewhere
            .fetch_add(summary.owned_elsewhere as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale_removed: self.stale_removed.load(Ordering::Relaxed),
            transient_failed: self.transient_failed.load(Ordering::Relaxed),
            owned_elsewhere: self.owned_elsewhere.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub broadcasts: u64,
    pub delivered: u64,
    pub stale_removed: u64,
    pub transient_failed: u64,
    pub owned_elsewhere: u64,
    pub scan_failures: u64,
}
