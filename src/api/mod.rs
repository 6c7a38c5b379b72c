//! API layer - HTTP endpoint handlers.

mod broadcast;
mod connections;
mod health;
mod metrics;
mod routes;

pub use broadcast::{broadcast, BroadcastResponse};
pub use connections::{get_connection, list_connections, ConnectionListResponse};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, public_routes};
