//! Realtime WebSocket message types
//!
//! JSON text frames tagged by `type`. Clients choose which sessions they hear
//! about; the server pushes `session_state`/`session_removed` frames for those
//! sessions and answers queries with `session`/`sessions`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::session::{CallSession, CallState, SessionChange};
use crate::utils::validation::MAX_ID_LEN;

/// Maximum accepted auth token length
pub const MAX_TOKEN_SIZE: usize = 4 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First-message authentication for clients that could not send a token
    Auth { token: String },

    /// Follow one session, or every session when `session_id` is absent
    Subscribe {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Stop following one session, or everything when `session_id` is absent
    Unsubscribe {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Current record of one session
    Get { session_id: String },

    /// Current records, optionally filtered by state
    List {
        #[serde(default)]
        state: Option<CallState>,
    },

    Ping,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageValidationError {
    #[error("session_id is {size} bytes, limit is {max}")]
    SessionIdTooLarge { size: usize, max: usize },

    #[error("token is {size} bytes, limit is {max}")]
    TokenTooLarge { size: usize, max: usize },
}

impl ClientMessage {
    /// Reject oversized fields before any lookup.
    pub fn validate_size(&self) -> Result<(), MessageValidationError> {
        let session_id = match self {
            ClientMessage::Auth { token } => {
                if token.len() > MAX_TOKEN_SIZE {
                    return Err(MessageValidationError::TokenTooLarge {
                        size: token.len(),
                        max: MAX_TOKEN_SIZE,
                    });
                }
                None
            }
            ClientMessage::Subscribe { session_id } | ClientMessage::Unsubscribe { session_id } => {
                session_id.as_deref()
            }
            ClientMessage::Get { session_id } => Some(session_id.as_str()),
            ClientMessage::List { .. } | ClientMessage::Ping => None,
        };

        match session_id {
            Some(id) if id.len() > MAX_ID_LEN => Err(MessageValidationError::SessionIdTooLarge {
                size: id.len(),
                max: MAX_ID_LEN,
            }),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// A followed session changed
    SessionState {
        session_id: String,
        state: CallState,
        #[serde(with = "time::serde::rfc3339")]
        updated_at: OffsetDateTime,
    },

    /// A followed session was evicted
    SessionRemoved {
        session_id: String,
        state: CallState,
        #[serde(with = "time::serde::rfc3339")]
        updated_at: OffsetDateTime,
    },

    Session { session: CallSession },

    Sessions { sessions: Vec<CallSession> },

    Pong,

    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&SessionChange> for ServerMessage {
    fn from(change: &SessionChange) -> Self {
        match change {
            SessionChange::Updated(snapshot) => ServerMessage::SessionState {
                session_id: snapshot.id.clone(),
                state: snapshot.state,
                updated_at: snapshot.updated_at,
            },
            SessionChange::Removed(snapshot) => ServerMessage::SessionRemoved {
                session_id: snapshot.id.clone(),
                state: snapshot.state,
                updated_at: snapshot.updated_at,
            },
        }
    }
}

/// Routing for frames queued to the socket writer
#[derive(Debug)]
pub enum MessageRoute {
    Outgoing(ServerMessage),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionSnapshot;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { session_id: None });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"list","state":"answered"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::List {
                state: Some(CallState::Answered)
            }
        );

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"get"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_validate_size() {
        let ok = ClientMessage::Get {
            session_id: "c1".to_string(),
        };
        assert!(ok.validate_size().is_ok());

        let long = ClientMessage::Subscribe {
            session_id: Some("a".repeat(MAX_ID_LEN + 1)),
        };
        assert!(matches!(
            long.validate_size(),
            Err(MessageValidationError::SessionIdTooLarge { .. })
        ));

        let token = ClientMessage::Auth {
            token: "t".repeat(MAX_TOKEN_SIZE + 1),
        };
        assert!(matches!(
            token.validate_size(),
            Err(MessageValidationError::TokenTooLarge { .. })
        ));
    }

    #[test]
    fn test_change_frames() {
        let snapshot = SessionSnapshot {
            id: "c1".to_string(),
            state: CallState::Completed,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(ServerMessage::from(&SessionChange::Updated(
            snapshot.clone(),
        )))
        .unwrap();
        assert_eq!(json["type"], "session_state");
        assert_eq!(json["session_id"], "c1");
        assert_eq!(json["state"], "completed");
        assert_eq!(json["updated_at"], "1970-01-01T00:00:00Z");

        let json = serde_json::to_value(ServerMessage::from(&SessionChange::Removed(snapshot)))
            .unwrap();
        assert_eq!(json["type"], "session_removed");
    }

    #[test]
    fn test_pong_and_error_shapes() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
        let json = serde_json::to_value(ServerMessage::error("not_found", "gone")).unwrap();
        assert_eq!(json["code"], "not_found");
    }
}
