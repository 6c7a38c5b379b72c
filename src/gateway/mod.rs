//! Gateway frontend: per-channel open/close/message events.
//!
//! A `Channel` moves `Unopened -> Open -> Closed`. Opening registers the id
//! and fails closed; closing deregisters it; while open, text frames are
//! routed on a selector field of the JSON body.

mod channel;
mod frontend;
pub mod handler;
mod message;
mod routes;

use thiserror::Error;

use crate::registry::RegistryError;

pub use channel::{Channel, ChannelState};
pub use frontend::Gateway;
pub use message::ServerMessage;
pub use routes::{RouteKind, RouteTable, RoutedMessage};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Registration failed; the transport should close the channel
    #[error("Connection rejected: {0}")]
    ConnectionRejected(RegistryError),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel is not open")]
    ChannelNotOpen,

    #[error("Channel was already opened")]
    AlreadyOpened,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl GatewayError {
    /// Code carried in the client-facing error frame
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ConnectionRejected(_) => "CONNECTION_REJECTED",
            GatewayError::UnknownRoute(_) => "UNKNOWN_ROUTE",
            GatewayError::InvalidMessage(_) => "INVALID_MESSAGE",
            GatewayError::ChannelNotOpen => "CHANNEL_NOT_OPEN",
            GatewayError::AlreadyOpened => "ALREADY_OPENED",
            GatewayError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

impl From<&GatewayError> for ServerMessage {
    fn from(err: &GatewayError) -> Self {
        ServerMessage::error(err.code(), err.to_string())
    }
}
