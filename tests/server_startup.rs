//! Server Startup Tests
//!
//! Server lifecycle, route wiring and authentication at the router level.

mod fixtures;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tokio::time::timeout;
use wiremock::MockServer;

use fixtures::{API_SECRET, auth_config, body_json, build_app, get, send, spawn_server, test_config};
use voice_call_gateway::state::AppState;

fn authorized(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check_is_public() {
    let provider = MockServer::start().await;
    let (state, app) = build_app(auth_config(&provider.uri())).await;

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let provider = MockServer::start().await;
    let (state, app) = build_app(auth_config(&provider.uri())).await;

    for uri in ["/calls", "/conferences", "/metrics"] {
        let response = send(&app, get(uri)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        assert!(response.headers().contains_key("www-authenticate"));

        let response = send(&app, authorized(uri, "wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");

        let response = send(&app, authorized(uri, API_SECRET)).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }

    state.shutdown().await;
}

#[tokio::test]
async fn test_webhooks_skip_bearer_auth() {
    let provider = MockServer::start().await;
    let (state, app) = build_app(auth_config(&provider.uri())).await;

    let response = send(&app, get("/webhooks/answer?uuid=in-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.store.contains("in-1"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_auth_disabled_allows_api() {
    let provider = MockServer::start().await;
    let (state, app) = build_app(test_config(&provider.uri())).await;

    let response = send(&app, get("/calls")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));

    let response = send(&app, get("/calls?state=bogus")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get("/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    state.shutdown().await;
}

#[tokio::test]
async fn test_missing_private_key_fails_startup() {
    let provider = MockServer::start().await;
    let mut config = test_config(&provider.uri());
    config.provider_application_id = Some("app-id".to_string());
    config.provider_private_key_path = Some("/nonexistent/private.key".into());

    assert!(AppState::new(config).await.is_err());
}

#[tokio::test]
async fn test_server_serves_and_shuts_down() {
    let provider = MockServer::start().await;
    let state = AppState::new(test_config(&provider.uri())).await.unwrap();
    let addr = spawn_server(state.clone()).await;

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Background tasks stop promptly once cancelled
    timeout(Duration::from_secs(5), state.shutdown())
        .await
        .expect("shutdown should not hang");
    assert!(state.shutdown_token().is_cancelled());
}
