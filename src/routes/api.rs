use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, calls, conferences};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes
///
/// Note: Authentication middleware is applied by [`super::build_router`]
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Call control
        .route("/calls", get(calls::list_calls).post(calls::make_call))
        .route("/calls/{id}", get(calls::get_call))
        .route("/calls/{id}/answer", post(calls::answer_call))
        .route("/calls/{id}/hangup", post(calls::hangup_call))
        .route("/calls/{id}/transfer", post(calls::transfer_call))
        .route("/calls/{id}/dtmf", post(calls::send_dtmf))
        .route("/calls/{id}/talk", post(calls::speak))
        .route(
            "/calls/{id}/recording",
            post(calls::start_recording).delete(calls::stop_recording),
        )
        // Conferences
        .route(
            "/conferences",
            get(conferences::list_conferences).post(conferences::create_conference),
        )
        .route("/conferences/{id}", get(conferences::get_conference))
        .route(
            "/conferences/{id}/participants",
            post(conferences::join_conference),
        )
        .route(
            "/conferences/{id}/participants/{call_id}",
            delete(conferences::leave_conference),
        )
        .route(
            "/conferences/{id}/participants/{call_id}/mute",
            post(conferences::mute_participant),
        )
        .route(
            "/conferences/{id}/participants/{call_id}/unmute",
            post(conferences::unmute_participant),
        )
        .route("/metrics", get(api::metrics))
        .layer(TraceLayer::new_for_http())
}
