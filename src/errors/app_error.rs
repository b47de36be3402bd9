use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::core::error::SessionError;

pub type AppResult<T> = Result<T, AppError>;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_action: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Session(err) => match err {
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::Conflict(_) => StatusCode::CONFLICT,
                SessionError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
                SessionError::InvalidTransition { .. } => StatusCode::CONFLICT,
                SessionError::ActionInProgress { .. } => StatusCode::CONFLICT,
                SessionError::ProviderError { .. } => StatusCode::BAD_GATEWAY,
                SessionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                SessionError::ParticipantBusy { .. } => StatusCode::CONFLICT,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            AppError::Session(err) => ErrorBody {
                error: err.code(),
                message: err.to_string(),
                provider_code: match err {
                    SessionError::ProviderError { code, .. } => Some(code.clone()),
                    _ => None,
                },
                pending_action: match err {
                    SessionError::ActionInProgress { pending, .. } => {
                        Some(pending.as_str().to_string())
                    }
                    _ => None,
                },
            },
            AppError::BadRequest(message) => ErrorBody {
                error: "bad_request",
                message: message.clone(),
                provider_code: None,
                pending_action: None,
            },
            AppError::Internal(_) => ErrorBody {
                error: "internal_error",
                message: "An internal error occurred".to_string(),
                provider_code: None,
                pending_action: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
