use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::BroadcastSummary;
use crate::registry::ConnectionId;
use crate::transport::Payload;

/// Frames sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Broadcast envelope delivered to every registered channel
    Message {
        route: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
        body: Value,
    },
    BroadcastResult {
        delivered: usize,
        stale_removed: usize,
        transient_failed: usize,
        owned_elsewhere: usize,
    },
    Pong,
    Shutdown {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn broadcast_result(summary: &BroadcastSummary) -> Self {
        Self::BroadcastResult {
            delivered: summary.delivered,
            stale_removed: summary.stale_removed,
            transient_failed: summary.transient_failed,
            owned_elsewhere: summary.owned_elsewhere,
        }
    }

    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}
