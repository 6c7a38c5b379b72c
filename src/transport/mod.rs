//! Delivery primitive: push a payload to one channel by id.
//!
//! The dispatcher only sees `DeliveryTransport`; `LocalTransport` is the
//! implementation for WebSocket channels terminated by this process.

mod local;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::ConnectionId;

pub use local::LocalTransport;

/// Serialized frame shared by every target of one broadcast
pub type Payload = Arc<str>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target is gone; its registry entry should be removed
    #[error("Target channel is no longer reachable")]
    Stale,

    /// Delivery failed this time; the target may still be open
    #[error("Transient delivery failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, id: &ConnectionId, payload: Payload) -> Result<(), DeliveryError>;
}
