use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::dispatcher::FanoutDispatcher;
use crate::gateway::Gateway;
use crate::redis::RedisPool;
use crate::registry::{create_registry, ConnectionRegistry, InstanceId};
use crate::transport::LocalTransport;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Owner recorded on every registry entry this process writes
    pub instance_id: InstanceId,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub transport: Arc<LocalTransport>,
    pub dispatcher: Arc<FanoutDispatcher>,
    pub gateway: Arc<Gateway>,
    pub redis_pool: Option<Arc<RedisPool>>,
    /// Set once graceful shutdown starts; no new channels are accepted
    pub draining: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, redis_pool: Option<Arc<RedisPool>>) -> Self {
        let registry = create_registry(&settings.registry, redis_pool.clone());
        Self::with_registry(settings, registry, redis_pool)
    }

    /// Build the state around an already constructed registry
    pub fn with_registry(
        settings: Settings,
        registry: Arc<dyn ConnectionRegistry>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        let instance_id = settings
            .registry
            .instance_id
            .clone()
            .map(InstanceId::new)
            .unwrap_or_else(InstanceId::generate);

        let transport = Arc::new(LocalTransport::new());
        let dispatcher = Arc::new(FanoutDispatcher::new(
            registry.clone(),
            transport.clone(),
            instance_id.clone(),
            &settings.dispatch,
        ));
        let gateway = Arc::new(Gateway::new(
            &settings.gateway,
            registry.clone(),
            dispatcher.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            instance_id,
            registry,
            transport,
            dispatcher,
            gateway,
            redis_pool,
            draining: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
