use std::sync::Arc;

use serde_json::Value;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::GatewayConfig;
use crate::dispatcher::{BroadcastSummary, DispatchError, FanoutDispatcher};
use crate::metrics::{ConnectionMetrics, RouteMetrics};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry, InstanceId, RegistryError};

use super::{Channel, GatewayError, RouteKind, RouteTable, ServerMessage};

/// Handles channel lifecycle events against the registry and routes
/// inbound messages.
pub struct Gateway {
    registry: Arc<dyn ConnectionRegistry>,
    instance: InstanceId,
    dispatcher: Arc<FanoutDispatcher>,
    routes: RouteTable,
    connect_retry_attempts: u32,
    backoff: BackoffConfig,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<dyn ConnectionRegistry>,
        dispatcher: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            registry,
            instance: dispatcher.instance_id().clone(),
            dispatcher,
            routes: RouteTable::from_config(config),
            connect_retry_attempts: config.connect_retry_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: config.backoff_initial_delay_ms,
                max_delay_ms: config.backoff_max_delay_ms,
                ..Default::default()
            },
        }
    }

    /// Owner recorded on the entries this gateway registers
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Register the channel and move it to `Open`.
    ///
    /// Registry failures are retried with backoff. If every attempt fails the
    /// channel is moved to `Closed` and `ConnectionRejected` is returned.
    #[tracing::instrument(name = "gateway.connect", skip(self, channel), fields(connection_id = %channel.id()))]
    pub async fn on_connect(&self, channel: &mut Channel) -> Result<Connection, GatewayError> {
        channel.ensure_unopened()?;

        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());
        loop {
            match self.registry.add(channel.id(), &self.instance).await {
                Ok(connection) => {
                    channel.mark_open();
                    ConnectionMetrics::record_opened();
                    tracing::info!(connection_id = %channel.id(), "Channel opened");
                    return Ok(connection);
                }
                Err(e) if backoff.attempt() < self.connect_retry_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        connection_id = %channel.id(),
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Registry add failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    channel.mark_closed();
                    ConnectionMetrics::record_rejected();
                    tracing::warn!(
                        connection_id = %channel.id(),
                        error = %e,
                        "Channel rejected"
                    );
                    return Err(GatewayError::ConnectionRejected(e));
                }
            }
        }
    }

    /// Move the channel to `Closed`, deregistering it if it was open.
    /// A registry failure is logged; the stale entry is removed by a later
    /// broadcast.
    #[tracing::instrument(name = "gateway.disconnect", skip(self, channel), fields(connection_id = %channel.id()))]
    pub async fn on_disconnect(&self, channel: &mut Channel) {
        let Some(open_for) = channel.mark_closed() else {
            return;
        };

        if let Err(e) = self.registry.remove(channel.id()).await {
            tracing::warn!(
                connection_id = %channel.id(),
                error = %e,
                "Failed to deregister closed channel"
            );
        }

        let duration = open_for.as_secs_f64();
        ConnectionMetrics::record_closed(duration);
        tracing::info!(
            connection_id = %channel.id(),
            duration_secs = duration,
            "Channel closed"
        );
    }

    /// Route one inbound text frame. Returns the frame to send back to the
    /// sender, if any. Rejected frames leave the registry untouched.
    #[tracing::instrument(name = "gateway.message", skip(self, channel, text), fields(connection_id = %channel.id()))]
    pub async fn on_message(
        &self,
        channel: &Channel,
        text: &str,
    ) -> Result<Option<ServerMessage>, GatewayError> {
        channel.ensure_open()?;

        let routed = match self.routes.resolve(text) {
            Ok(routed) => routed,
            Err(e) => {
                match e {
                    GatewayError::UnknownRoute(_) => RouteMetrics::record_unknown_route(),
                    _ => RouteMetrics::record_invalid(),
                }
                tracing::debug!(connection_id = %channel.id(), error = %e, "Message rejected");
                return Err(e);
            }
        };
        RouteMetrics::record_routed(&routed.route);

        match routed.kind {
            RouteKind::Ping => Ok(Some(ServerMessage::Pong)),
            RouteKind::Broadcast => {
                let summary = self
                    .broadcast(&routed.route, Some(channel.id()), routed.body)
                    .await
                    .map_err(|e| match e {
                        DispatchError::StorageUnavailable(RegistryError::StorageUnavailable(
                            reason,
                        )) => GatewayError::StorageUnavailable(reason),
                        DispatchError::Encode(reason) => GatewayError::InvalidMessage(reason),
                    })?;
                Ok(Some(ServerMessage::broadcast_result(&summary)))
            }
        }
    }

    /// Wrap `body` in the broadcast envelope and fan it out
    pub async fn broadcast(
        &self,
        route: &str,
        from: Option<&ConnectionId>,
        body: Value,
    ) -> Result<BroadcastSummary, DispatchError> {
        let envelope = ServerMessage::Message {
            route: route.to_string(),
            from: from.cloned(),
            body,
        };
        let payload = envelope
            .to_payload()
            .map_err(|e| DispatchError::Encode(e.to_string()))?;
        self.dispatcher.broadcast(payload).await
    }
}
