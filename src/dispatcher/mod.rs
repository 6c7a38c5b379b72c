//! Fan-out delivery of one message to every registered channel, with lazy
//! removal of registry entries whose channel is already gone.

mod fanout;
mod types;

pub use fanout::FanoutDispatcher;
pub use types::{
    BroadcastSummary, DispatchError, DispatcherStatsSnapshot, TargetOutcome, TargetResult,
};
