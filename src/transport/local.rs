use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::registry::ConnectionId;

use super::{DeliveryError, DeliveryTransport, Payload};

/// Outbound queues of the WebSocket channels owned by this process.
///
/// An id with no attached queue, or whose socket task has dropped its
/// receiver, is reported `Stale`. A full queue makes `deliver` wait, so a
/// slow reader is bounded by the dispatcher's per-target timeout.
pub struct LocalTransport {
    channels: DashMap<ConnectionId, mpsc::Sender<Payload>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Attach a channel's outbound queue. Replaces any previous queue for `id`.
    pub fn attach(&self, id: ConnectionId, sender: mpsc::Sender<Payload>) {
        self.channels.insert(id, sender);
    }

    pub fn detach(&self, id: &ConnectionId) -> bool {
        self.channels.remove(id).is_some()
    }

    pub fn is_attached(&self, id: &ConnectionId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn attached_ids(&self) -> Vec<ConnectionId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Best-effort send that never waits, for server-initiated notices
    pub fn try_send(&self, id: &ConnectionId, payload: Payload) -> bool {
        self.channels
            .get(id)
            .map(|sender| sender.try_send(payload).is_ok())
            .unwrap_or(false)
    }

    /// Drop every attached queue. Socket tasks observe the closed queue and
    /// shut their channel down.
    pub fn detach_all(&self) -> Vec<ConnectionId> {
        let ids = self.attached_ids();
        for id in &ids {
            self.channels.remove(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for LocalTransport {
    async fn deliver(&self, id: &ConnectionId, payload: Payload) -> Result<(), DeliveryError> {
        // Clone the sender so the map shard is not locked across the await
        let sender = match self.channels.get(id) {
            Some(entry) => entry.value().clone(),
            None => return Err(DeliveryError::Stale),
        };

        sender.send(payload).await.map_err(|_| {
            // Receiver dropped: the socket task has exited
            self.channels.remove_if(id, |_, s| s.same_channel(&sender));
            DeliveryError::Stale
        })
    }
}
