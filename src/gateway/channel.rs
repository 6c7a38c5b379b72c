use std::time::{Duration, Instant};

use serde::Serialize;

use crate::registry::ConnectionId;

use super::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Unopened,
    Open,
    /// Terminal
    Closed,
}

/// Gateway-side view of one transport channel
#[derive(Debug)]
pub struct Channel {
    id: ConnectionId,
    state: ChannelState,
    opened_at: Option<Instant>,
}

impl Channel {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ChannelState::Unopened,
            opened_at: None,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub(crate) fn ensure_unopened(&self) -> Result<(), GatewayError> {
        match self.state {
            ChannelState::Unopened => Ok(()),
            _ => Err(GatewayError::AlreadyOpened),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GatewayError::ChannelNotOpen)
        }
    }

    pub(crate) fn mark_open(&mut self) {
        self.state = ChannelState::Open;
        self.opened_at = Some(Instant::now());
    }

    /// Move to `Closed`. Returns how long the channel was open, or `None`
    /// if it never was (or was already closed).
    pub(crate) fn mark_closed(&mut self) -> Option<Duration> {
        let was_open = self.is_open();
        self.state = ChannelState::Closed;
        if was_open {
            self.opened_at.take().map(|t| t.elapsed())
        } else {
            None
        }
    }
}
