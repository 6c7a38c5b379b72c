//! End-to-end tests over the in-memory registry and the local transport.
//!
//! Channels are driven through the gateway directly (no sockets); the HTTP
//! surface is exercised with `tower::ServiceExt::oneshot`.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;

use futures::TryStreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use ws_relay::config::Settings;
use ws_relay::gateway::{Channel, ChannelState, GatewayError};
use ws_relay::dispatcher::TargetOutcome;
use ws_relay::registry::{ConnectionId, ConnectionRegistry, MemoryRegistry};
use ws_relay::server::{create_app, AppState};
use ws_relay::shutdown::GracefulShutdown;
use ws_relay::transport::Payload;

fn test_state(settings: Settings) -> (AppState, Router) {
    let state = AppState::new(settings, None);
    let app = create_app(state.clone());
    (state, app)
}

async fn open_channel(state: &AppState, name: &str) -> (Channel, mpsc::Receiver<Payload>) {
    let (tx, rx) = mpsc::channel(8);
    let id = ConnectionId::new(name);
    state.transport.attach(id.clone(), tx);
    let mut channel = Channel::new(id);
    state.gateway.on_connect(&mut channel).await.unwrap();
    (channel, rx)
}

async fn registered(state: &AppState) -> Vec<ConnectionId> {
    let mut ids: Vec<ConnectionId> = state.registry.list_all().try_collect().await.unwrap();
    ids.sort();
    ids
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_connect_then_disconnect_leaves_registry_empty() {
    let (state, _app) = test_state(Settings::default());
    let (mut channel, _rx) = open_channel(&state, "a").await;

    assert_eq!(registered(&state).await, vec![ConnectionId::new("a")]);

    state.transport.detach(channel.id());
    state.gateway.on_disconnect(&mut channel).await;

    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(registered(&state).await.is_empty());
}

#[tokio::test]
async fn test_sendmessage_fans_out_and_removes_stale_channel() {
    let (state, _app) = test_state(Settings::default());
    let (sender, mut rx_a) = open_channel(&state, "a").await;
    let (_b, rx_b) = open_channel(&state, "b").await;
    let (_c, mut rx_c) = open_channel(&state, "c").await;
    // b's socket task is gone without a disconnect event
    drop(rx_b);

    let reply = state
        .gateway
        .on_message(&sender, r#"{"action":"sendmessage","data":"hello"}"#)
        .await
        .unwrap()
        .unwrap();

    let reply = serde_json::to_value(reply).unwrap();
    assert_eq!(reply["type"], "broadcast_result");
    assert_eq!(reply["delivered"], 2);
    assert_eq!(reply["stale_removed"], 1);

    for rx in [&mut rx_a, &mut rx_c] {
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["route"], "sendmessage");
        assert_eq!(frame["from"], "a");
        assert_eq!(frame["body"]["data"], "hello");
    }

    assert_eq!(
        registered(&state).await,
        vec![ConnectionId::new("a"), ConnectionId::new("c")]
    );
}

#[tokio::test]
async fn test_unknown_route_leaves_registry_unchanged() {
    let (state, _app) = test_state(Settings::default());
    let (channel, _rx) = open_channel(&state, "a").await;
    let before = registered(&state).await;

    let err = state
        .gateway
        .on_message(&channel, r#"{"action":"teleport"}"#)
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::UnknownRoute("teleport".into()));
    assert_eq!(registered(&state).await, before);
}

#[tokio::test]
async fn test_http_broadcast_over_empty_registry() {
    let (_state, app) = test_state(Settings::default());

    let response = app
        .oneshot(post_json("/api/v1/broadcast", json!({"text": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["delivered"], 0);
    assert_eq!(body["targets"], json!([]));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_http_broadcast_reaches_channels() {
    let (state, app) = test_state(Settings::default());
    let (_a, mut rx) = open_channel(&state, "a").await;

    let response = app
        .oneshot(post_json("/api/v1/broadcast", json!({"text": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["delivered"], 1);
    assert_eq!(body["targets"][0]["connection_id"], "a");
    assert_eq!(body["targets"][0]["outcome"], "delivered");

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["route"], "api");
    assert!(frame.get("from").is_none());
    assert_eq!(frame["body"], json!({"text": "hi"}));
}

#[tokio::test]
async fn test_http_broadcast_rejects_malformed_body() {
    let (_state, app) = test_state(Settings::default());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/broadcast")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_instances_sharing_a_registry_keep_each_others_channels() {
    let shared = Arc::new(MemoryRegistry::new());
    let a = AppState::with_registry(Settings::default(), shared.clone(), None);
    let b = AppState::with_registry(Settings::default(), shared.clone(), None);
    assert_ne!(a.instance_id, b.instance_id);

    let (_a1, mut rx_a1) = open_channel(&a, "a1").await;
    let (b1, mut rx_b1) = open_channel(&b, "b1").await;
    // left behind by a closed channel of instance a
    shared.add(&ConnectionId::new("a-gone"), &a.instance_id).await.unwrap();

    let summary = a.gateway.broadcast("api", None, json!("hi")).await.unwrap();

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.stale_removed, 1);
    assert_eq!(summary.owned_elsewhere, 1);
    assert_eq!(
        summary.outcome_for(&ConnectionId::new("b1")),
        Some(&TargetOutcome::OwnedElsewhere)
    );
    assert_eq!(
        registered(&a).await,
        vec![ConnectionId::new("a1"), ConnectionId::new("b1")]
    );
    assert!(b1.is_open());
    assert!(rx_a1.recv().await.is_some());
    assert!(rx_b1.try_recv().is_err());

    // b still reaches its own channel and leaves a's alone
    let summary = b.gateway.broadcast("api", None, json!("hey")).await.unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.owned_elsewhere, 1);
    assert_eq!(registered(&b).await.len(), 2);
}

#[tokio::test]
async fn test_connection_endpoints() {
    let (state, app) = test_state(Settings::default());
    let (_a, _rx_a) = open_channel(&state, "a").await;
    let (_b, _rx_b) = open_channel(&state, "b").await;

    let response = app.clone().oneshot(get("/api/v1/connections")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["connections"], json!(["a", "b"]));

    let response = app.clone().oneshot(get("/api/v1/connections/a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], "a");
    assert!(body["connected_at"].is_string());
    assert_eq!(body["owner"], state.instance_id.as_str());

    let response = app.oneshot(get("/api/v1/connections/zzz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_api_key_guards_api_routes_only() {
    let mut settings = Settings::default();
    settings.api.key = Some("secret".to_string());
    let (_state, app) = test_state(settings);

    let response = app.clone().oneshot(get("/api/v1/connections")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/api/v1/connections")
        .header("X-API-Key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/v1/connections")
        .header("X-API-Key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_stats() {
    let (state, app) = test_state(Settings::default());
    let (_a, _rx) = open_channel(&state, "a").await;
    state.gateway.broadcast("api", None, json!(1)).await.unwrap();

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["instance_id"], state.instance_id.as_str());
    assert_eq!(body["registry"]["backend"], "memory");
    assert_eq!(body["registry"]["reachable"], true);
    assert_eq!(body["local_channels"], 1);
    assert!(body.get("redis").is_none());

    let response = app.oneshot(get("/stats")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["dispatcher"]["broadcasts"], 1);
    assert_eq!(body["dispatcher"]["delivered"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (_state, app) = test_state(Settings::default());

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_shutdown_deregisters_local_channels() {
    let (state, _app) = test_state(Settings::default());
    let (_a, mut rx_a) = open_channel(&state, "a").await;
    let (_b, _rx_b) = open_channel(&state, "b").await;

    let shutdown = GracefulShutdown::new(
        state.registry.clone(),
        state.transport.clone(),
        state.draining.clone(),
    );
    let result = shutdown.execute("test").await;

    assert!(state.is_draining());
    assert!(result.success);
    assert_eq!(result.deregistered, 2);
    assert!(registered(&state).await.is_empty());

    let notice: Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
    assert_eq!(notice["type"], "shutdown");
}
