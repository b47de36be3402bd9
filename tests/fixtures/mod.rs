//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tower::util::ServiceExt;

use voice_call_gateway::{ServerConfig, config::AuthApiSecret, routes, state::AppState};

pub const API_SECRET: &str = "test-api-secret";
pub const CALLER_ID: &str = "+14155550199";

/// Configuration pointing the provider client at `provider_url`.
pub fn test_config(provider_url: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        provider_api_url: provider_url.to_string(),
        provider_api_key: Some("key".to_string()),
        provider_api_secret: Some("secret".to_string()),
        provider_application_id: None,
        provider_private_key_path: None,
        provider_from_number: Some(CALLER_ID.to_string()),
        provider_timeout_seconds: 5,
        public_base_url: Some("https://gateway.example.com".to_string()),
        webhook_signature_secret: None,
        answer_greeting: None,
        webhook_dedup_ttl_seconds: 600,
        session_retention_seconds: 300,
        pending_grace_seconds: 30,
        sweep_interval_ms: 60_000,
        max_cas_retries: 3,
        fanout_queue_size: 64,
        auth_api_secrets: Vec::new(),
        auth_required: false,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 100_000,
        rate_limit_burst_size: 100,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

/// Same as [`test_config`] with bearer auth turned on.
pub fn auth_config(provider_url: &str) -> ServerConfig {
    let mut config = test_config(provider_url);
    config.auth_required = true;
    config.auth_api_secrets = vec![AuthApiSecret {
        id: "client-a".to_string(),
        secret: API_SECRET.to_string(),
    }];
    config
}

pub async fn build_app(config: ServerConfig) -> (Arc<AppState>, Router) {
    let state = AppState::new(config)
        .await
        .expect("state should build from test config");
    let app = routes::build_router(state.clone());
    (state, app)
}

/// Serve `state` on an ephemeral port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = routes::build_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server error");
    });
    addr
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("router is infallible")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("JSON body")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// Provider event payload with an explicit sequence number.
pub fn webhook(call_id: &str, status: &str, seq: u64) -> Value {
    json!({
        "uuid": call_id,
        "status": status,
        "seq": seq,
        "timestamp": OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .expect("format timestamp"),
    })
}
