use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::session::ConferenceSession;
use crate::errors::app_error::AppResult;
use crate::state::AppState;
use crate::utils::validation::validate_id;

#[derive(Debug, Default, Deserialize)]
pub struct CreateConferenceRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinConferenceRequest {
    pub call_id: String,
}

/// Handler for GET /conferences
pub async fn list_conferences(State(state): State<Arc<AppState>>) -> Json<Vec<ConferenceSession>> {
    Json(state.store.conferences().list())
}

/// Handler for POST /conferences - body is optional
pub async fn create_conference(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateConferenceRequest>>,
) -> AppResult<(StatusCode, Json<ConferenceSession>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let conference = state.dispatcher.create_conference(request.name)?;
    Ok((StatusCode::CREATED, Json(conference)))
}

/// Handler for GET /conferences/{id}
pub async fn get_conference(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<String>,
) -> AppResult<Json<ConferenceSession>> {
    validate_id("conference", &conference_id)?;
    Ok(Json(state.store.conferences().get(&conference_id)?))
}

/// Handler for POST /conferences/{id}/participants
pub async fn join_conference(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<String>,
    body: Result<Json<JoinConferenceRequest>, JsonRejection>,
) -> AppResult<Json<ConferenceSession>> {
    let Json(request) = body?;
    Ok(Json(
        state
            .dispatcher
            .join_conference(&conference_id, &request.call_id)
            .await?,
    ))
}

/// Handler for DELETE /conferences/{id}/participants/{call_id}
pub async fn leave_conference(
    State(state): State<Arc<AppState>>,
    Path((conference_id, call_id)): Path<(String, String)>,
) -> AppResult<Json<ConferenceSession>> {
    Ok(Json(
        state
            .dispatcher
            .leave_conference(&conference_id, &call_id)
            .await?,
    ))
}

/// Handler for POST /conferences/{id}/participants/{call_id}/mute
pub async fn mute_participant(
    State(state): State<Arc<AppState>>,
    Path((conference_id, call_id)): Path<(String, String)>,
) -> AppResult<Json<ConferenceSession>> {
    Ok(Json(
        state
            .dispatcher
            .mute_participant(&conference_id, &call_id)
            .await?,
    ))
}

/// Handler for POST /conferences/{id}/participants/{call_id}/unmute
pub async fn unmute_participant(
    State(state): State<Arc<AppState>>,
    Path((conference_id, call_id)): Path<(String, String)>,
) -> AppResult<Json<ConferenceSession>> {
    Ok(Json(
        state
            .dispatcher
            .unmute_participant(&conference_id, &call_id)
            .await?,
    ))
}
