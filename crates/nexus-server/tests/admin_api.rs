//! Integration tests for the admin HTTP API.
//!
//! Endpoints are seeded with in-process connections so every send can be
//! observed from the peer side without opening sockets.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use nexus_core::{local, local::LocalPeer, Endpoint, EndpointConfig, Frame, MessageKind};
use nexus_server::{
    config::{Config, EndpointSettings},
    routes,
    state::AppState,
};
use nexus_types::{EndpointListResponse, SendFailureResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// App with a `/chat` endpoint holding seeded connections `ids`.
fn create_test_app(ids: &[&str]) -> (Router, Arc<AppState>, Vec<LocalPeer>) {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        write_timeout_ms: 1000,
        endpoints: vec![EndpointSettings::new("/ws")],
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config).expect("Failed to create AppState"));

    let mut endpoint_config = EndpointConfig::default();
    let mut peers = Vec::new();
    for id in ids {
        let (peer, sink, _source) = local::pair();
        endpoint_config = endpoint_config.with_connection(*id, sink);
        peers.push(peer);
    }
    state.manager.register(Endpoint::new("/chat", endpoint_config));

    (routes::router(state.clone()), state, peers)
}

async fn request(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Vec<u8>) {
    request(app, Method::POST, uri, Some(body)).await
}

#[tokio::test]
async fn test_health() {
    let (app, _state, _peers) = create_test_app(&[]);
    let (status, body) = request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_endpoints() {
    let (app, _state, _peers) = create_test_app(&["u2", "u1"]);
    let (status, body) = request(&app, Method::GET, "/api/endpoints", None).await;
    assert_eq!(status, StatusCode::OK);

    let list: EndpointListResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(list.total_connections, 2);
    assert_eq!(list.endpoints.len(), 2);
    assert_eq!(list.endpoints[0].path, "/chat");
    assert_eq!(list.endpoints[0].conn_ids, vec!["u1".to_string(), "u2".to_string()]);
    assert_eq!(list.endpoints[1].path, "/ws");
    assert_eq!(list.endpoints[1].connection_count, 0);
}

#[tokio::test]
async fn test_point_to_point_text_and_binary() {
    let (app, _state, mut peers) = create_test_app(&["u1"]);

    let (status, _) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/chat", "conn_id": "u1", "text": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(peers[0].try_recv(), Some(Frame::text("hello")));

    let (status, _) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/chat", "conn_id": "u1", "kind": 2, "base64": "AQID"}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let frame = peers[0].try_recv().unwrap();
    assert_eq!(frame.kind, MessageKind::Binary);
    assert_eq!(&frame.payload[..], &[1, 2, 3]);
}

#[tokio::test]
async fn test_point_to_point_not_found() {
    let (app, _state, _peers) = create_test_app(&["u1"]);

    let (status, body) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/missing", "conn_id": "u1", "text": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let report: SendFailureResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.endpoint_path, "/missing");
    assert_eq!(report.failures[0].conn_id, None);

    let (status, body) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/chat", "conn_id": "ghost", "text": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let report: SendFailureResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.failures[0].conn_id.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn test_bad_payload_is_rejected() {
    let (app, _state, _peers) = create_test_app(&["u1"]);

    let (status, _) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/chat", "conn_id": "u1", "base64": "not base64!"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        "/api/messages",
        json!({"endpoint_path": "/chat", "conn_id": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multicast_reports_missing_ids() {
    let (app, _state, mut peers) = create_test_app(&["u1", "u2"]);

    let (status, body) = post(
        &app,
        "/api/multicast",
        json!({"endpoint_path": "/chat", "conn_ids": ["u2", "ghost"], "text": "hey"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let report: SendFailureResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.endpoint_path, "/chat");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].conn_id.as_deref(), Some("ghost"));

    assert_eq!(peers[0].try_recv(), None);
    assert_eq!(peers[1].try_recv(), Some(Frame::text("hey")));
}

#[tokio::test]
async fn test_batch_keeps_order() {
    let (app, _state, mut peers) = create_test_app(&["u1"]);

    let (status, body) = post(
        &app,
        "/api/batch",
        json!({"messages": [
            {"endpoint_path": "/chat", "conn_id": "u1", "text": "first"},
            null,
            {"endpoint_path": "/nope", "conn_id": "u1", "text": "lost"},
            {"endpoint_path": "/chat", "conn_id": "u1", "text": "second"},
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let report: SendFailureResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.endpoint_path, "");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].endpoint_path, "/nope");

    assert_eq!(peers[0].try_recv(), Some(Frame::text("first")));
    assert_eq!(peers[0].try_recv(), Some(Frame::text("second")));
}

#[tokio::test]
async fn test_broadcast_reports_failed_write() {
    let (app, _state, mut peers) = create_test_app(&["u1", "u2"]);
    let _ = peers.pop();

    let (status, body) = post(
        &app,
        "/api/broadcast",
        json!({"endpoint_path": "/chat", "text": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let report: SendFailureResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.endpoint_path, "/chat");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].conn_id.as_deref(), Some("u2"));
    assert_eq!(peers[0].try_recv(), Some(Frame::text("hi")));

    // Unset path: every endpoint.
    let (status, _) = post(&app, "/api/broadcast", json!({"text": "all"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(peers[0].try_recv(), Some(Frame::text("all")));
}

#[tokio::test]
async fn test_disconnect() {
    let (app, state, mut peers) = create_test_app(&["u1"]);

    let body = json!({"endpoint_path": "/chat", "conn_id": "u1"});
    let (status, _) = request(&app, Method::DELETE, "/api/endpoints/connections", Some(body.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(state.manager.connection_count("/chat").unwrap(), 0);
    assert_eq!(peers[0].recv().await, None);

    let (status, _) = request(&app, Method::DELETE, "/api/endpoints/connections", Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_can_be_disabled() {
    let config = Config {
        admin_enabled: false,
        ..Config::default()
    };
    let app = routes::router(Arc::new(AppState::new(config).unwrap()));

    let (status, _) = request(&app, Method::GET, "/api/endpoints", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
