//! WebSocket transport binding for the gateway.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::registry::ConnectionId;
use crate::server::AppState;
use crate::transport::Payload;

use super::{Channel, Gateway, ServerMessage};

/// WebSocket upgrade handler. Refuses new channels once shutdown has begun.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.is_draining() {
        tracing::debug!("WebSocket upgrade refused during shutdown");
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    let max_bytes = state.settings.gateway.max_message_bytes;
    let id = ConnectionId::generate();
    tracing::debug!(connection_id = %id, "WebSocket upgrade requested");

    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, id))
}

/// Drive one established WebSocket through the channel lifecycle
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(connection_id = %id, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, id: ConnectionId) {
    let (tx, mut rx) = mpsc::channel::<Payload>(state.settings.gateway.outbound_capacity());

    // Attach before registering so a broadcast that sees the new id can
    // reach it
    state.transport.attach(id.clone(), tx.clone());

    let mut channel = Channel::new(id.clone());
    let (mut ws_sender, mut ws_receiver) = socket.split();

    if let Err(e) = state.gateway.on_connect(&mut channel).await {
        state.transport.detach(&id);
        close_with(&mut ws_sender, &ServerMessage::from(&e)).await;
        return;
    }

    // Shutdown may have detached and deregistered local channels while this
    // one was registering
    if state.is_draining() {
        state.transport.detach(&id);
        state.gateway.on_disconnect(&mut channel).await;
        let notice = ServerMessage::Shutdown {
            reason: "server shutting down".to_string(),
        };
        close_with(&mut ws_sender, &notice).await;
        return;
    }

    // The transport owns the only strong sender, so detaching it ends the
    // send task. Replies go through a weak handle.
    let replies = tx.downgrade();
    drop(tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender
                .send(Message::Text(payload.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %id, "Send task completed");
        }
        _ = receive_loop(&mut ws_receiver, &state.gateway, &channel, &replies) => {
            tracing::debug!(connection_id = %id, "Receive loop completed");
        }
    }
    send_task.abort();

    state.transport.detach(&id);
    state.gateway.on_disconnect(&mut channel).await;
}

/// Send one last frame, then close the socket
async fn close_with(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) {
    if let Ok(payload) = message.to_payload() {
        let _ = sender.send(Message::Text(payload.to_string().into())).await;
    }
    let _ = sender.close().await;
}

async fn receive_loop(
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Arc<Gateway>,
    channel: &Channel,
    replies: &mpsc::WeakSender<Payload>,
) {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = match gateway.on_message(channel, text.as_str()).await {
                    Ok(reply) => reply,
                    Err(e) => Some(ServerMessage::from(&e)),
                };
                if let Some(reply) = reply {
                    send_reply(replies, &reply).await;
                }
            }
            Ok(Message::Binary(_)) => {
                let reply =
                    ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported");
                send_reply(replies, &reply).await;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(connection_id = %channel.id(), "Received close frame");
                return;
            }
            // Ping/pong frames are answered by the WebSocket layer
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection_id = %channel.id(), error = %e, "WebSocket receive error");
                return;
            }
        }
    }
}

async fn send_reply(replies: &mpsc::WeakSender<Payload>, message: &ServerMessage) {
    let Some(sender) = replies.upgrade() else {
        return;
    };
    match message.to_payload() {
        Ok(payload) => {
            let _ = sender.send(payload).await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}
