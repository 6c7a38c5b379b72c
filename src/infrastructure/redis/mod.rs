//! Redis access for the connection registry
//!
//! - `CircuitBreaker`: fails fast while Redis is unavailable
//! - `RedisHealth`: connection status for `/health`
//! - `pool`: shared multiplexed connection and the commands the registry uses

mod circuit_breaker;
mod health;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{RedisHealth, RedisHealthSnapshot, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
