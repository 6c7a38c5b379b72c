use std::collections::HashMap;
use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::gateway::RouteKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Required `X-API-Key` for `/api/v1`; unset disables the check
    pub key: Option<String>,
}

/// Connection registry backing store
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// "memory" or "redis"
    #[serde(default = "default_registry_backend")]
    pub backend: String,
    /// Key prefix for Redis entries: `{prefix}:{connection_id}`
    #[serde(default = "default_registry_prefix")]
    pub redis_prefix: String,
    /// Expire Redis entries after this many seconds (0 = never). Open
    /// channels are refreshed every third of the TTL.
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl_seconds: u64,
    /// Owner recorded on entries this process writes. Random when unset;
    /// set it to a stable name so a restarted process reclaims its old
    /// entries.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// COUNT hint for each SCAN page
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// JSON field of an inbound message holding the route selector
    #[serde(default = "default_route_selector")]
    pub route_selector: String,
    /// selector -> route kind
    #[serde(default = "default_routes")]
    pub routes: HashMap<String, RouteKind>,
    /// Retries of `Registry.add` before a channel open is rejected
    #[serde(default = "default_connect_retry_attempts")]
    pub connect_retry_attempts: u32,
    #[serde(default = "default_backoff_initial_delay")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay")]
    pub backoff_max_delay_ms: u64,
    /// Capacity of each channel's outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Timeout of a single per-target delivery attempt
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit log lines as JSON instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_registry_backend() -> String {
    "memory".to_string()
}

fn default_registry_prefix() -> String {
    "wsrelay:connections".to_string()
}

fn default_entry_ttl() -> u64 {
    300
}

fn default_scan_batch_size() -> usize {
    100
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_route_selector() -> String {
    "action".to_string()
}

fn default_routes() -> HashMap<String, RouteKind> {
    HashMap::from([
        ("sendmessage".to_string(), RouteKind::Broadcast),
        ("ping".to_string(), RouteKind::Ping),
    ])
}

fn default_connect_retry_attempts() -> u32 {
    2
}

fn default_backoff_initial_delay() -> u64 {
    50
}

fn default_backoff_max_delay() -> u64 {
    1_000
}

fn default_outbound_buffer() -> usize {
    32
}

fn default_max_message_bytes() -> usize {
    128 * 1024 // 128 KiB
}

fn default_delivery_timeout() -> u64 {
    5_000
}

fn default_max_concurrent_deliveries() -> usize {
    100
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ws-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("registry.backend", "memory")?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("gateway.route_selector", "action")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // WSRELAY__SERVER__PORT, WSRELAY__REGISTRY__BACKEND, WSRELAY__API__KEY, ...
            .add_source(
                Environment::with_prefix("WSRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            api: ApiConfig::default(),
            registry: RegistryConfig::default(),
            redis: RedisConfig::default(),
            gateway: GatewayConfig::default(),
            dispatch: DispatchConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            redis_prefix: default_registry_prefix(),
            entry_ttl_seconds: default_entry_ttl(),
            instance_id: None,
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

impl RegistryConfig {
    /// How often open channels refresh their entry, if entries expire
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.entry_ttl_seconds > 0)
            .then(|| Duration::from_secs((self.entry_ttl_seconds / 3).max(1)))
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            route_selector: default_route_selector(),
            routes: default_routes(),
            connect_retry_attempts: default_connect_retry_attempts(),
            backoff_initial_delay_ms: default_backoff_initial_delay(),
            backoff_max_delay_ms: default_backoff_max_delay(),
            outbound_buffer: default_outbound_buffer(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl GatewayConfig {
    /// Outbound queue capacity; a bounded channel needs at least one slot
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_buffer.max(1)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}
