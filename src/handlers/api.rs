use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::core::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Handler for GET / - liveness check, no auth
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub active_sessions: usize,
    pub active_conferences: usize,
    pub realtime_subscribers: usize,
    pub websocket_connections: usize,
}

/// Handler for GET /metrics - counters plus current gauges
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: state.metrics.snapshot(),
        active_sessions: state.store.len(),
        active_conferences: state.store.conferences().list().len(),
        realtime_subscribers: state.fanout.subscriber_count(),
        websocket_connections: state.ws_connection_count(),
    })
}
