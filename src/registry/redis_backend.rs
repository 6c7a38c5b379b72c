//! Redis-backed connection registry.
//!
//! Each connection is one hash at `{prefix}:{connection_id}` with a
//! `connected_at` field (RFC 3339) and the `owner` instance id. HSET/DEL are
//! atomic per key; listing pages through `SCAN MATCH {prefix}:*`.
//!
//! With `entry_ttl_seconds > 0` entries expire unless the owning process
//! keeps refreshing them, so entries of a crashed process age out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::RegistryConfig;
use crate::metrics::RegistryMetrics;
use crate::redis::{PoolError, RedisPool};

use super::{
    Connection, ConnectionId, ConnectionIdStream, ConnectionRegistry, InstanceId, RegistryError,
};

const CONNECTED_AT_FIELD: &str = "connected_at";
const OWNER_FIELD: &str = "owner";

pub struct RedisRegistry {
    pool: Arc<RedisPool>,
    prefix: String,
    entry_ttl_seconds: u64,
    scan_batch_size: usize,
}

impl RedisRegistry {
    pub fn new(pool: Arc<RedisPool>, config: &RegistryConfig) -> Self {
        Self {
            pool,
            prefix: config.redis_prefix.clone(),
            entry_ttl_seconds: config.entry_ttl_seconds,
            scan_batch_size: config.scan_batch_size.max(1),
        }
    }

    fn entry_key(&self, id: &ConnectionId) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn scan_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

fn storage_error(operation: &'static str, err: PoolError) -> RegistryError {
    RegistryMetrics::record_error(operation);
    tracing::warn!(operation, error = %err, "Registry store operation failed");
    RegistryError::StorageUnavailable(err.to_string())
}

#[async_trait]
impl ConnectionRegistry for RedisRegistry {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn add(
        &self,
        id: &ConnectionId,
        owner: &InstanceId,
    ) -> Result<Connection, RegistryError> {
        let connection = Connection::new(id.clone(), owner.clone());
        let key = self.entry_key(id);

        self.pool
            .put_hash(
                &key,
                &[
                    (CONNECTED_AT_FIELD, connection.connected_at.to_rfc3339()),
                    (OWNER_FIELD, owner.to_string()),
                ],
                self.entry_ttl_seconds,
            )
            .await
            .map_err(|e| storage_error("add", e))?;

        tracing::debug!(connection_id = %id, key = %key, "Connection registered in Redis");
        Ok(connection)
    }

    async fn remove(&self, id: &ConnectionId) -> Result<(), RegistryError> {
        // DEL of a missing key is a no-op
        self.pool
            .del(&self.entry_key(id))
            .await
            .map_err(|e| storage_error("remove", e))?;

        tracing::debug!(connection_id = %id, "Connection unregistered from Redis");
        Ok(())
    }

    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>, RegistryError> {
        let fields = self
            .pool
            .hgetall(&self.entry_key(id))
            .await
            .map_err(|e| storage_error("get", e))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let connected_at = fields
            .get(CONNECTED_AT_FIELD)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| {
                tracing::warn!(connection_id = %id, "Registry entry has no valid connected_at");
                DateTime::<Utc>::default()
            });

        Ok(Some(Connection {
            id: id.clone(),
            connected_at,
            owner: fields.get(OWNER_FIELD).map(InstanceId::new),
        }))
    }

    async fn refresh(&self, id: &ConnectionId) -> Result<bool, RegistryError> {
        let key = self.entry_key(id);
        let result = if self.entry_ttl_seconds > 0 {
            self.pool.expire(&key, self.entry_ttl_seconds).await
        } else {
            self.pool.exists(&key).await
        };
        result.map_err(|e| storage_error("refresh", e))
    }

    fn expires_entries(&self) -> bool {
        self.entry_ttl_seconds > 0
    }

    fn list_all(&self) -> ConnectionIdStream {
        let pool = self.pool.clone();
        let pattern = self.scan_pattern();
        let key_prefix = format!("{}:", self.prefix);
        let batch = self.scan_batch_size;

        Box::pin(async_stream::stream! {
            let mut cursor = 0u64;
            loop {
                match pool.scan_match(cursor, &pattern, batch).await {
                    Ok((next, keys)) => {
                        for key in keys {
                            if let Some(id) = key.strip_prefix(&key_prefix) {
                                yield Ok(ConnectionId::new(id));
                            }
                        }
                        if next == 0 {
                            break;
                        }
                        cursor = next;
                    }
                    Err(e) => {
                        yield Err(storage_error("list_all", e));
                        break;
                    }
                }
            }
        })
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        self.pool.ping().await.map_err(|e| storage_error("ping", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use crate::config::RedisConfig;
    use crate::redis::{CircuitBreaker, RedisHealth};

    fn create_lazy_pool() -> (Arc<RedisPool>, Arc<CircuitBreaker>) {
        // Client::open does not connect, so no Redis is needed here
        let cb = Arc::new(CircuitBreaker::new());
        let pool = RedisPool::new(
            RedisConfig::default(),
            cb.clone(),
            Arc::new(RedisHealth::new()),
        )
        .unwrap();
        (Arc::new(pool), cb)
    }

    fn registry_with_prefix(prefix: &str) -> (RedisRegistry, Arc<CircuitBreaker>) {
        let (pool, cb) = create_lazy_pool();
        let config = RegistryConfig {
            backend: "redis".to_string(),
            redis_prefix: prefix.to_string(),
            ..RegistryConfig::default()
        };
        (RedisRegistry::new(pool, &config), cb)
    }

    #[test]
    fn test_key_layout() {
        let (registry, _) = registry_with_prefix("relay:conn");
        assert_eq!(registry.entry_key(&ConnectionId::new("abc")), "relay:conn:abc");
        assert_eq!(registry.scan_pattern(), "relay:conn:*");
    }

    #[test]
    fn test_expiry_follows_ttl() {
        let (pool, _) = create_lazy_pool();
        let mut config = RegistryConfig {
            entry_ttl_seconds: 0,
            ..RegistryConfig::default()
        };
        assert!(!RedisRegistry::new(pool.clone(), &config).expires_entries());

        config.entry_ttl_seconds = 60;
        assert!(RedisRegistry::new(pool, &config).expires_entries());
    }

    #[tokio::test]
    async fn test_open_circuit_surfaces_storage_unavailable() {
        let (registry, cb) = registry_with_prefix("relay:conn");
        for _ in 0..5 {
            cb.record_failure();
        }

        let id = ConnectionId::new("abc");
        assert!(matches!(
            registry.add(&id, &InstanceId::new("gw-1")).await,
            Err(RegistryError::StorageUnavailable(_))
        ));
        assert!(matches!(
            registry.remove(&id).await,
            Err(RegistryError::StorageUnavailable(_))
        ));
        assert!(matches!(
            registry.refresh(&id).await,
            Err(RegistryError::StorageUnavailable(_))
        ));

        let items: Vec<_> = registry.list_all().collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
