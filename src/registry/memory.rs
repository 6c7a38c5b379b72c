//! In-memory connection registry using DashMap.
//!
//! Entries are lost on restart, which matches the lifetime of channels
//! terminated by this process.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};

use super::{
    Connection, ConnectionId, ConnectionIdStream, ConnectionRegistry, InstanceId, RegistryError,
};

pub struct MemoryRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn add(
        &self,
        id: &ConnectionId,
        owner: &InstanceId,
    ) -> Result<Connection, RegistryError> {
        let connection = Connection::new(id.clone(), owner.clone());

        // Upsert: an existing entry is replaced, refreshing connected_at
        self.connections.insert(id.clone(), connection.clone());

        tracing::debug!(connection_id = %id, "Connection registered");
        Ok(connection)
    }

    async fn remove(&self, id: &ConnectionId) -> Result<(), RegistryError> {
        if self.connections.remove(id).is_some() {
            tracing::debug!(connection_id = %id, "Connection unregistered");
        }
        Ok(())
    }

    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>, RegistryError> {
        Ok(self.connections.get(id).map(|entry| entry.value().clone()))
    }

    async fn refresh(&self, id: &ConnectionId) -> Result<bool, RegistryError> {
        Ok(self.connections.contains_key(id))
    }

    fn list_all(&self) -> ConnectionIdStream {
        // Snapshot the keys so no shard lock is held while the consumer awaits
        let ids: Vec<Result<ConnectionId, RegistryError>> = self
            .connections
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();

        stream::iter(ids).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn owner() -> InstanceId {
        InstanceId::new("gw-1")
    }

    async fn collect(registry: &MemoryRegistry) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = registry.list_all().try_collect().await.unwrap();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let registry = MemoryRegistry::new();
        let id = ConnectionId::new("a");

        let first = registry.add(&id, &owner()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.add(&id, &owner()).await.unwrap();
        registry.add(&id, &owner()).await.unwrap();

        assert_eq!(collect(&registry).await, vec![id.clone()]);

        let stored = registry.get(&id).await.unwrap().unwrap();
        assert!(stored.connected_at > first.connected_at);
        assert_eq!(stored.owner, Some(owner()));
    }

    #[tokio::test]
    async fn test_refresh_reports_presence() {
        let registry = MemoryRegistry::new();
        let id = ConnectionId::new("a");
        assert!(!registry.refresh(&id).await.unwrap());

        registry.add(&id, &owner()).await.unwrap();
        assert!(registry.refresh(&id).await.unwrap());
        assert!(!registry.expires_entries());
    }

    #[tokio::test]
    async fn test_remove_excludes_id() {
        let registry = MemoryRegistry::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        registry.add(&a, &owner()).await.unwrap();
        registry.add(&b, &owner()).await.unwrap();

        registry.remove(&a).await.unwrap();

        assert_eq!(collect(&registry).await, vec![b]);
        assert!(registry.get(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let registry = MemoryRegistry::new();
        tokio_test::assert_ok!(registry.remove(&ConnectionId::new("ghost")).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_all_is_restartable() {
        let registry = MemoryRegistry::new();
        registry.add(&ConnectionId::new("a"), &owner()).await.unwrap();

        let first = collect(&registry).await;
        registry.add(&ConnectionId::new("b"), &owner()).await.unwrap();
        let second = collect(&registry).await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_list_all_empty() {
        let registry = MemoryRegistry::new();
        assert!(collect(&registry).await.is_empty());
    }
}
