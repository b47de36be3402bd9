//! Voice provider capability.
//!
//! The command dispatcher is the only component holding a [`VoiceProvider`].
//! Every operation is a fallible remote call; the dispatcher wraps each one in
//! a timeout.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::SessionError;

pub use http::{HttpVoiceProvider, ProviderCredentials, USER_AGENT};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure reported by the provider, with its own error code preserved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct ProviderError {
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        SessionError::ProviderError {
            code: err.code,
            message: err.message,
        }
    }
}

/// Outbound call request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceCallRequest {
    /// Destination number, E.164 without the leading `+`
    pub to: String,
    /// Caller id, E.164 without the leading `+`
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_url: Option<String>,
}

/// Provider acknowledgement of a placed call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlacedCall {
    pub uuid: String,
    #[serde(default)]
    pub conversation_uuid: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Where a call is transferred to. Reachability is the provider's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferTarget {
    /// Another phone number
    Phone { number: String },
    /// A call-control document hosted at `url`
    Url { url: String },
}

/// Text-to-speech into a live call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<u32>,
    /// Times to repeat; 0 loops until stopped
    #[serde(default = "default_loop", rename = "loop")]
    pub repeat: u32,
}

fn default_loop() -> u32 {
    1
}

/// Membership operation on a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConferenceOp {
    Join,
    Leave,
    Mute,
    Unmute,
}

impl ConferenceOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ConferenceOp::Join => "join",
            ConferenceOp::Leave => "leave",
            ConferenceOp::Mute => "mute",
            ConferenceOp::Unmute => "unmute",
        }
    }
}

/// Remote call-control operations offered by the voice provider.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn place_call(&self, request: &PlaceCallRequest) -> ProviderResult<PlacedCall>;

    async fn answer(&self, call_id: &str) -> ProviderResult<()>;

    async fn hangup(&self, call_id: &str) -> ProviderResult<()>;

    async fn transfer(&self, call_id: &str, target: &TransferTarget) -> ProviderResult<()>;

    async fn send_digits(&self, call_id: &str, digits: &str) -> ProviderResult<()>;

    async fn start_recording(&self, call_id: &str) -> ProviderResult<()>;

    async fn stop_recording(&self, call_id: &str) -> ProviderResult<()>;

    async fn speak(&self, call_id: &str, request: &SpeakRequest) -> ProviderResult<()>;

    async fn conference_op(
        &self,
        conference_id: &str,
        call_id: &str,
        op: ConferenceOp,
    ) -> ProviderResult<()>;
}
