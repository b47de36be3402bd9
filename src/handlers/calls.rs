//! Call-control endpoints.
//!
//! Each command goes through the [`CommandDispatcher`](crate::core::dispatcher::CommandDispatcher),
//! which validates input, marks the pending action and calls the provider.
//! The session returned reflects the store after the command; webhooks move
//! the call state on from there.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::dispatcher::MakeCallRequest;
use crate::core::provider::{SpeakRequest, TransferTarget};
use crate::core::session::{CallSession, SessionFilter};
use crate::errors::app_error::AppResult;
use crate::state::AppState;
use crate::utils::validation::validate_call_id;

/// Body of `POST /calls/{id}/dtmf`
#[derive(Debug, Deserialize)]
pub struct DtmfRequest {
    pub digits: String,
}

/// Handler for GET /calls - sessions matching the optional
/// `state`, `direction` and `has_pending` query filters
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<SessionFilter>, QueryRejection>,
) -> AppResult<Json<Vec<CallSession>>> {
    let Query(filter) = filter?;
    Ok(Json(state.store.list(&filter)))
}

/// Handler for POST /calls - place an outbound call
///
/// # Example Request
/// ```json
/// { "to": "+14155550100", "from": "+14155550199" }
/// ```
///
/// Returns 201 with the new session in `initiating` state.
pub async fn make_call(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MakeCallRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CallSession>)> {
    let Json(request) = body?;
    let session = state.dispatcher.make_call(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for GET /calls/{id}
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    validate_call_id(&call_id)?;
    Ok(Json(state.store.get(&call_id)?))
}

/// Handler for POST /calls/{id}/answer
pub async fn answer_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    Ok(Json(state.dispatcher.answer_call(&call_id).await?))
}

/// Handler for POST /calls/{id}/hangup
pub async fn hangup_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    Ok(Json(state.dispatcher.hangup_call(&call_id).await?))
}

/// Handler for POST /calls/{id}/transfer
///
/// # Example Request
/// ```json
/// { "type": "phone", "number": "14155550123" }
/// ```
pub async fn transfer_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
    body: Result<Json<TransferTarget>, JsonRejection>,
) -> AppResult<Json<CallSession>> {
    let Json(target) = body?;
    Ok(Json(state.dispatcher.transfer_call(&call_id, &target).await?))
}

/// Handler for POST /calls/{id}/dtmf
pub async fn send_dtmf(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
    body: Result<Json<DtmfRequest>, JsonRejection>,
) -> AppResult<Json<CallSession>> {
    let Json(request) = body?;
    Ok(Json(
        state.dispatcher.send_dtmf(&call_id, &request.digits).await?,
    ))
}

/// Handler for POST /calls/{id}/talk
pub async fn speak(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
    body: Result<Json<SpeakRequest>, JsonRejection>,
) -> AppResult<Json<CallSession>> {
    let Json(request) = body?;
    Ok(Json(state.dispatcher.speak(&call_id, &request).await?))
}

/// Handler for POST /calls/{id}/recording
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    Ok(Json(state.dispatcher.start_recording(&call_id).await?))
}

/// Handler for DELETE /calls/{id}/recording
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    Ok(Json(state.dispatcher.stop_recording(&call_id).await?))
}
