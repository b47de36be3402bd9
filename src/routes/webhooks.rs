//! Provider webhook routes
//!
//! Not behind bearer auth. When a signature secret is configured every
//! delivery passes through [`webhook_signature_middleware`] first.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::webhooks;
use crate::middleware::webhook_signature_middleware;
use crate::state::AppState;

/// Create the webhook router
///
/// # Endpoints
///
/// - `GET|POST /webhooks/answer` - inbound call arrival, returns call control
/// - `POST /webhooks/{source}` - `event`, `recording`, `dtmf` or `error`
pub fn create_webhook_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/webhooks/answer",
            get(webhooks::answer_get).post(webhooks::answer_post),
        )
        .route("/webhooks/{source}", post(webhooks::provider_event))
        .layer(middleware::from_fn_with_state(
            state,
            webhook_signature_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
