pub mod api;
pub mod webhooks;
pub mod ws;

use axum::{Router, middleware, routing::get};
use std::sync::Arc;

use crate::handlers;
use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;

/// Assemble every route with its auth and connection middleware.
///
/// Transport layers (CORS, rate limiting, security headers) are added by the
/// binary on top of this.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected_routes = api::create_api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    // Layer order (outer to inner): connection_limit -> auth -> handler
    let ws_routes = ws::create_ws_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ));

    let webhook_routes = webhooks::create_webhook_router(state.clone());

    let public_routes = Router::new().route("/", get(handlers::api::health_check));

    public_routes
        .merge(webhook_routes)
        .merge(protected_routes)
        .merge(ws_routes)
        .with_state(state)
}
