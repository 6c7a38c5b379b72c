//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthStatus {
    Healthy,
    Reconnecting,
    CircuitOpen,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::CircuitOpen => "circuit_open",
        }
    }
}

/// Tracks whether the registry's Redis connection is usable. Updated by
/// `RedisPool` on every connect attempt and circuit breaker rejection.
pub struct RedisHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    reconnection_attempts: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting as u8),
            last_connected: AtomicI64::new(0),
            reconnection_attempts: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.last_connected
            .store(current_time_ms(), Ordering::Release);
        self.reconnection_attempts.store(0, Ordering::Release);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnection_attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(RedisHealthStatus::CircuitOpen as u8, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        match self.status.load(Ordering::Acquire) {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn snapshot(&self) -> RedisHealthSnapshot {
        let last_connected_ms = self.last_connected.load(Ordering::Acquire);
        RedisHealthSnapshot {
            status: self.status(),
            last_connected_at: match last_connected_ms {
                0 => None,
                ms => DateTime::from_timestamp_millis(ms),
            },
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RedisHealthSnapshot {
    pub status: RedisHealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Failed connects since the last success
    pub reconnection_attempts: u32,
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_transitions() {
        let health = RedisHealth::new();
        assert_eq!(health.status(), RedisHealthStatus::Reconnecting);
        assert!(!health.is_healthy());

        assert!(health.snapshot().last_connected_at.is_none());

        health.set_reconnecting();
        health.set_reconnecting();
        assert_eq!(health.snapshot().reconnection_attempts, 2);

        health.set_connected();
        assert!(health.is_healthy());
        let snapshot = health.snapshot();
        assert_eq!(snapshot.reconnection_attempts, 0);
        assert!(snapshot.last_connected_at.is_some());

        health.set_circuit_open();
        assert_eq!(health.status().as_str(), "circuit_open");
        let json = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(json["status"], "circuit_open");
    }
}
