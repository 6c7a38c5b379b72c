use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use ws_relay::config::Settings;
use ws_relay::redis::{CircuitBreaker, CircuitBreakerConfig, RedisHealth, RedisPool};
use ws_relay::server::{create_app, AppState};
use ws_relay::shutdown::GracefulShutdown;
use ws_relay::tasks::RegistryHeartbeat;
use ws_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let redis_pool = if settings.registry.backend == "redis" {
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(
            &settings.redis,
        )));
        let pool = RedisPool::new(
            settings.redis.clone(),
            circuit_breaker,
            Arc::new(RedisHealth::new()),
        )?;
        if let Err(e) = pool.ping().await {
            // Not fatal: the circuit breaker and connect retries take over
            tracing::warn!(error = %e, url = %pool.url(), "Redis not reachable at startup");
        }
        Some(Arc::new(pool))
    } else {
        None
    };

    let state = AppState::new(settings.clone(), redis_pool);
    tracing::info!(
        registry = state.registry.backend_name(),
        instance_id = %state.instance_id,
        "Application state initialized"
    );

    let (stop_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_handle = match settings.registry.refresh_interval() {
        Some(interval) if state.registry.expires_entries() => {
            let heartbeat = RegistryHeartbeat::new(
                state.registry.clone(),
                state.transport.clone(),
                state.instance_id.clone(),
                interval,
                stop_tx.subscribe(),
            );
            Some(tokio::spawn(heartbeat.run()))
        }
        _ => None,
    };

    let shutdown = GracefulShutdown::new(
        state.registry.clone(),
        state.transport.clone(),
        state.draining.clone(),
    );
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop refreshing entries before they are deregistered
            let _ = stop_tx.send(());
            if let Some(handle) = heartbeat_handle {
                let _ = handle.await;
            }
            // axum does not drain upgraded connections
            shutdown.execute("server shutting down").await;
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
