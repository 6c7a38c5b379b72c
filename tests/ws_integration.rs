//! WebSocket round trips against the router served on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ws_relay::config::Settings;
use ws_relay::registry::{
    Connection, ConnectionId, ConnectionIdStream, ConnectionRegistry, InstanceId, RegistryError,
};
use ws_relay::server::{create_app, AppState};
use ws_relay::shutdown::GracefulShutdown;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Registry whose writes always fail
#[derive(Default)]
struct DownRegistry {
    add_calls: AtomicU32,
}

#[async_trait]
impl ConnectionRegistry for DownRegistry {
    fn backend_name(&self) -> &'static str {
        "down"
    }

    async fn add(
        &self,
        _id: &ConnectionId,
        _owner: &InstanceId,
    ) -> Result<Connection, RegistryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        Err(RegistryError::StorageUnavailable("connection refused".into()))
    }

    async fn remove(&self, _id: &ConnectionId) -> Result<(), RegistryError> {
        Err(RegistryError::StorageUnavailable("connection refused".into()))
    }

    async fn get(&self, _id: &ConnectionId) -> Result<Option<Connection>, RegistryError> {
        Ok(None)
    }

    fn list_all(&self) -> ConnectionIdStream {
        Box::pin(futures::stream::once(async {
            Err(RegistryError::StorageUnavailable("connection refused".into()))
        }))
    }
}

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = connect_async(ws_url(addr)).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .expect("socket closed")
            .expect("invalid frame");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait for the server to close the socket, skipping control frames
async fn expect_closed(client: &mut Client) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("socket not closed within 2s");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
        }
    }
}

async fn registered(state: &AppState) -> Vec<ConnectionId> {
    let mut ids: Vec<ConnectionId> = state.registry.list_all().try_collect().await.unwrap();
    ids.sort();
    ids
}

/// Poll the registry until it holds `expected` entries
async fn wait_for_registered(state: &AppState, expected: usize) -> Vec<ConnectionId> {
    for _ in 0..100 {
        let ids = registered(state).await;
        if ids.len() == expected {
            return ids;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {expected} entries");
}

fn fast_retry_settings() -> Settings {
    let mut settings = Settings::default();
    settings.gateway.backoff_initial_delay_ms = 1;
    settings.gateway.backoff_max_delay_ms = 2;
    settings
}

#[tokio::test]
async fn test_socket_lifecycle_and_control_routes() {
    let state = AppState::new(Settings::default(), None);
    let addr = serve(state.clone()).await;
    let mut client = connect(addr).await;

    let ids = wait_for_registered(&state, 1).await;
    assert!(state.transport.is_attached(&ids[0]));
    let entry = state.registry.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(entry.owner, Some(state.instance_id.clone()));

    send_json(&mut client, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");

    client
        .send(Message::binary(vec![0x01, 0x02, 0x03]))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "UNSUPPORTED_FORMAT");

    send_json(&mut client, json!({"action": "teleport"})).await;
    assert_eq!(next_json(&mut client).await["code"], "UNKNOWN_ROUTE");

    client
        .send(Message::text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["code"], "INVALID_MESSAGE");

    // still registered after rejected frames
    assert_eq!(registered(&state).await, ids);

    client.close(None).await.unwrap();
    wait_for_registered(&state, 0).await;
    assert!(state.transport.is_empty());
}

#[tokio::test]
async fn test_sendmessage_reaches_every_socket() {
    let state = AppState::new(Settings::default(), None);
    let addr = serve(state.clone()).await;
    let mut sender = connect(addr).await;
    let mut receiver = connect(addr).await;
    wait_for_registered(&state, 2).await;

    send_json(&mut sender, json!({"action": "sendmessage", "data": "hello"})).await;

    let frame = next_json(&mut receiver).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["route"], "sendmessage");
    assert_eq!(frame["body"]["data"], "hello");
    assert!(frame["from"].is_string());

    // the sender gets its own copy and then the result
    let own = next_json(&mut sender).await;
    assert_eq!(own["type"], "message");
    assert_eq!(own["from"], frame["from"]);
    let result = next_json(&mut sender).await;
    assert_eq!(result["type"], "broadcast_result");
    assert_eq!(result["delivered"], 2);
    assert_eq!(result["stale_removed"], 0);
}

#[tokio::test]
async fn test_rejected_channel_gets_error_then_close() {
    let registry = Arc::new(DownRegistry::default());
    let state = AppState::with_registry(fast_retry_settings(), registry.clone(), None);
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "CONNECTION_REJECTED");
    expect_closed(&mut client).await;

    // one attempt plus two retries, and the queue was detached
    assert_eq!(registry.add_calls.load(Ordering::SeqCst), 3);
    assert!(state.transport.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_sockets_and_refuses_new_ones() {
    let state = AppState::new(Settings::default(), None);
    let addr = serve(state.clone()).await;
    let mut client = connect(addr).await;
    wait_for_registered(&state, 1).await;

    let shutdown = GracefulShutdown::new(
        state.registry.clone(),
        state.transport.clone(),
        state.draining.clone(),
    );
    let result = shutdown.execute("maintenance").await;
    assert_eq!(result.deregistered, 1);

    let notice = next_json(&mut client).await;
    assert_eq!(notice["type"], "shutdown");
    assert_eq!(notice["reason"], "maintenance");
    expect_closed(&mut client).await;
    assert!(registered(&state).await.is_empty());

    match connect_async(ws_url(addr)).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
        }
        Err(other) => panic!("unexpected handshake error: {other}"),
        Ok(_) => panic!("upgrade accepted while draining"),
    }
    assert!(state.transport.is_empty());
    assert!(registered(&state).await.is_empty());
}
