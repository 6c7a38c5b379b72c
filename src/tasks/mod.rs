//! Background tasks spawned next to the HTTP server.

mod heartbeat;

pub use heartbeat::{RefreshRound, RegistryHeartbeat};
