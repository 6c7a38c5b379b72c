mod settings;

pub use settings::{
    ApiConfig, DispatchConfig, GatewayConfig, OtelConfig, RedisConfig, RegistryConfig,
    ServerConfig, Settings,
};
