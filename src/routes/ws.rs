use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_handler;
use crate::state::AppState;

/// Create the realtime WebSocket router
///
/// `GET /ws` upgrades to a socket streaming session state changes. See
/// [`crate::handlers::ws::messages`] for the frame formats.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
}
