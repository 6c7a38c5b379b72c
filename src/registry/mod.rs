//! Connection registry: the set of open channel ids shared by every event
//! handler.
//!
//! # Backend Architecture
//!
//! - `MemoryRegistry`: DashMap, process-local (default)
//! - `RedisRegistry`: one Redis hash per connection, survives restarts
//!
//! Both guarantee atomic single-key insert and delete; nothing needs
//! cross-key consistency. Every entry records the `InstanceId` of the
//! process that terminates the channel, so processes sharing a store never
//! clean up each other's live entries. Use `create_registry()` to pick a backend from
//! configuration.

mod memory;
mod redis_backend;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::redis::RedisPool;

pub use memory::MemoryRegistry;
pub use redis_backend::RedisRegistry;
pub use types::{Connection, ConnectionId, InstanceId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Backing store unreachable; the caller may retry
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Lazy sequence of registered ids. Items are fallible because a paged
/// store can fail part way through.
pub type ConnectionIdStream = BoxStream<'static, Result<ConnectionId, RegistryError>>;

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Backend identifier for health output
    fn backend_name(&self) -> &'static str;

    /// Insert `id` owned by `owner`, stamped with the current time.
    /// Re-adding an existing id refreshes its timestamp; there is never more
    /// than one entry per id.
    async fn add(
        &self,
        id: &ConnectionId,
        owner: &InstanceId,
    ) -> Result<Connection, RegistryError>;

    /// Delete `id`. Removing an absent id is not an error.
    async fn remove(&self, id: &ConnectionId) -> Result<(), RegistryError>;

    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>, RegistryError>;

    /// Stream every registered id. Finite, no ordering guarantee, and each
    /// call re-reads the store. May yield an id more than once.
    fn list_all(&self) -> ConnectionIdStream;

    /// Extend the lifetime of an expiring entry. Returns `false` when the
    /// entry no longer exists.
    async fn refresh(&self, id: &ConnectionId) -> Result<bool, RegistryError> {
        Ok(self.get(id).await?.is_some())
    }

    /// Whether entries expire unless refreshed
    fn expires_entries(&self) -> bool {
        false
    }

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Create a registry backend based on configuration.
///
/// - `"redis"`: `RedisRegistry` if a pool is provided, otherwise memory
/// - anything else: `MemoryRegistry`
pub fn create_registry(
    settings: &RegistryConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn ConnectionRegistry> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    ttl_seconds = settings.entry_ttl_seconds,
                    "Creating Redis connection registry"
                );
                Arc::new(RedisRegistry::new(pool, settings))
            } else {
                tracing::warn!(
                    "Redis registry requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryRegistry::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory connection registry");
            Arc::new(MemoryRegistry::new())
        }
    }
}
