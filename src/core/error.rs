//! Error taxonomy shared by the call-session core.
//!
//! Store, normalizer and state-machine errors are local and recoverable by the
//! caller (retry, drop, or log). Dispatcher errors are surfaced to HTTP callers
//! through [`crate::errors::app_error::AppError`].

use thiserror::Error;

use super::session::{ActionKind, CallState};

/// Result type for call-session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors produced by the session store, normalizer, state machine and dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Unknown session or conference id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Another writer updated the record between read and write. Retryable.
    #[error("Concurrent update conflict on '{0}'")]
    Conflict(String),

    /// Webhook body could not be turned into a canonical event
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The state machine has no transition for this (state, event) pair
    #[error("Invalid transition from {state} on {event}")]
    InvalidTransition { state: CallState, event: String },

    /// A command is already awaiting provider confirmation on this session
    #[error("Action {pending} already in progress on '{call_id}'")]
    ActionInProgress { call_id: String, pending: ActionKind },

    /// The provider rejected or failed the remote call
    #[error("Provider error [{code}]: {message}")]
    ProviderError { code: String, message: String },

    /// The provider did not answer in time; the pending action is left for the sweep
    #[error("Provider call timed out: {0}")]
    Timeout(String),

    /// Request shape rejected before reaching the provider
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Participant already belongs to a different conference
    #[error("Participant '{participant}' is already in conference '{conference}'")]
    ParticipantBusy {
        participant: String,
        conference: String,
    },
}

impl SessionError {
    /// Short machine-readable code used in HTTP and WebSocket error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "not_found",
            SessionError::Conflict(_) => "conflict",
            SessionError::MalformedPayload(_) => "malformed_payload",
            SessionError::InvalidTransition { .. } => "invalid_transition",
            SessionError::ActionInProgress { .. } => "action_in_progress",
            SessionError::ProviderError { .. } => "provider_error",
            SessionError::Timeout(_) => "timeout",
            SessionError::InvalidInput(_) => "invalid_input",
            SessionError::ParticipantBusy { .. } => "participant_busy",
        }
    }
}
