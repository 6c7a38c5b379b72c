//! Infrastructure layer modules
//!
//! Shared components used by the registry, gateway and dispatcher:
//! - `backoff`: exponential backoff for registry retries
//! - `config`: application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `redis`: Redis connection pool, circuit breaker, and health tracking

pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
