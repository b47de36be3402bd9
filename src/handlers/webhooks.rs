//! Provider webhook endpoints.
//!
//! Every delivery is acknowledged with 200, whatever happened to it. A
//! non-2xx makes the provider redeliver, and redelivery cannot fix a
//! malformed body, an invalid transition or an unknown call. Outcomes are
//! logged and counted by the ingestor instead.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::core::events::SourceKind;
use crate::state::AppState;

/// Call-control document returned to the answer webhook.
fn answer_ncco(state: &AppState) -> Json<Value> {
    match state.config.answer_greeting.as_deref() {
        Some(greeting) => Json(json!([{ "action": "talk", "text": greeting }])),
        None => Json(json!([])),
    }
}

/// Handler for GET /webhooks/answer
///
/// The provider fetches call control for an inbound call with the call
/// details in the query string. Without a timestamp in the query the event
/// opens the session but does not advance its sequence.
pub async fn answer_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let payload: Map<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    // Errors are logged and counted inside the ingestor
    let _ = state.ingestor.ingest_unsequenced(
        &Value::Object(payload),
        SourceKind::Answer,
        OffsetDateTime::now_utc(),
    );
    answer_ncco(&state)
}

/// Handler for POST /webhooks/answer
pub async fn answer_post(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Value> {
    let _ = state.ingestor.ingest_slice(&body, SourceKind::Answer);
    answer_ncco(&state)
}

/// Handler for POST /webhooks/{source}
///
/// `source` is one of `event`, `recording`, `dtmf` (alias `input`) or
/// `error` (alias `errors`).
pub async fn provider_event(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    body: Bytes,
) -> StatusCode {
    match source.parse::<SourceKind>() {
        Ok(kind) => {
            let _ = state.ingestor.ingest_slice(&body, kind);
        }
        Err(e) => {
            state.metrics.record_webhook();
            state.metrics.record_malformed();
            tracing::warn!(%source, error = %e, "Webhook for unknown source dropped");
        }
    }
    StatusCode::OK
}
