//! Signed webhook check for the provider callback routes.
//!
//! Without a configured secret every delivery passes. With one, the body is
//! buffered, checked against the token in `Authorization`, and put back for
//! the handler. Failed deliveries are logged and answered with 200 so the
//! provider does not retry them.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::state::AppState;

pub async fn webhook_signature_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(verifier) = state.webhook_verifier.as_ref() else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(%path, error = %e, "Failed to read webhook body");
            return StatusCode::OK.into_response();
        }
    };

    let authorization = parts
        .headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    match verifier.verify(authorization, &body_bytes, OffsetDateTime::now_utc()) {
        Ok(_) => {
            let request = Request::from_parts(parts, Body::from(body_bytes));
            next.run(request).await
        }
        Err(e) => {
            state.metrics.record_signature_failure();
            tracing::warn!(%path, error = %e, "Dropping webhook with bad signature");
            StatusCode::OK.into_response()
        }
    }
}
