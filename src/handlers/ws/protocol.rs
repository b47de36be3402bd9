//! Socket-independent handling of client requests.
//!
//! Kept free of I/O so every request/response pair can be tested against a
//! bare [`SessionStore`].

use crate::core::fanout::InterestUpdate;
use crate::core::session::{SessionFilter, SessionStore};
use crate::utils::validation::validate_call_id;

use super::messages::{ClientMessage, ServerMessage};

/// Frames to send back plus any change to the connection's interest.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub frames: Vec<ServerMessage>,
    pub interest: Option<InterestUpdate>,
}

impl Reply {
    fn frame(frame: ServerMessage) -> Self {
        Self {
            frames: vec![frame],
            interest: None,
        }
    }
}

/// Answer one authenticated client message.
///
/// `auth` messages are handled by the connection loop and are answered here
/// with an error.
pub fn handle_client_message(message: ClientMessage, store: &SessionStore) -> Reply {
    match message {
        ClientMessage::Subscribe { session_id: None } => Reply {
            frames: vec![ServerMessage::Subscribed { session_id: None }],
            interest: Some(InterestUpdate::SubscribeAll),
        },
        ClientMessage::Subscribe {
            session_id: Some(id),
        } => {
            if let Err(e) = validate_call_id(&id) {
                return Reply::frame(ServerMessage::error(e.code(), e.to_string()));
            }
            let mut frames = vec![ServerMessage::Subscribed {
                session_id: Some(id.clone()),
            }];
            // Current state first so the client has a baseline for later updates
            if let Ok(session) = store.get(&id) {
                let snapshot = session.snapshot();
                frames.push(ServerMessage::SessionState {
                    session_id: snapshot.id,
                    state: snapshot.state,
                    updated_at: snapshot.updated_at,
                });
            }
            Reply {
                frames,
                interest: Some(InterestUpdate::Subscribe(id)),
            }
        }
        ClientMessage::Unsubscribe { session_id: None } => Reply {
            frames: vec![ServerMessage::Unsubscribed { session_id: None }],
            interest: Some(InterestUpdate::UnsubscribeAll),
        },
        ClientMessage::Unsubscribe {
            session_id: Some(id),
        } => Reply {
            frames: vec![ServerMessage::Unsubscribed {
                session_id: Some(id.clone()),
            }],
            interest: Some(InterestUpdate::Unsubscribe(id)),
        },
        ClientMessage::Get { session_id } => match store.get(&session_id) {
            Ok(session) => Reply::frame(ServerMessage::Session { session }),
            Err(e) => Reply::frame(ServerMessage::error(e.code(), e.to_string())),
        },
        ClientMessage::List { state } => {
            let filter = SessionFilter {
                state,
                ..SessionFilter::default()
            };
            Reply::frame(ServerMessage::Sessions {
                sessions: store.list(&filter),
            })
        }
        ClientMessage::Ping => Reply::frame(ServerMessage::Pong),
        ClientMessage::Auth { .. } => Reply::frame(ServerMessage::error(
            "already_authenticated",
            "Connection is already authenticated",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{CallSession, CallState, Direction};
    use time::OffsetDateTime;

    fn store_with(sessions: &[(&str, CallState)]) -> SessionStore {
        let store = SessionStore::new(3, 16);
        for (i, (id, state)) in sessions.iter().enumerate() {
            let created = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(i as i64);
            store
                .upsert(id, |current| {
                    let mut session = current
                        .cloned()
                        .unwrap_or_else(|| CallSession::new(*id, Direction::Outbound, created));
                    session.state = *state;
                    Ok(Some(session))
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_subscribe_all() {
        let store = store_with(&[]);
        let reply = handle_client_message(ClientMessage::Subscribe { session_id: None }, &store);
        assert_eq!(reply.interest, Some(InterestUpdate::SubscribeAll));
        assert_eq!(reply.frames, vec![ServerMessage::Subscribed { session_id: None }]);
    }

    #[test]
    fn test_subscribe_known_session_sends_baseline() {
        let store = store_with(&[("c1", CallState::Ringing)]);
        let reply = handle_client_message(
            ClientMessage::Subscribe {
                session_id: Some("c1".to_string()),
            },
            &store,
        );
        assert_eq!(reply.interest, Some(InterestUpdate::Subscribe("c1".to_string())));
        assert_eq!(reply.frames.len(), 2);
        assert!(matches!(
            &reply.frames[1],
            ServerMessage::SessionState { session_id, state: CallState::Ringing, .. } if session_id == "c1"
        ));
    }

    #[test]
    fn test_subscribe_unknown_session_waits_for_it() {
        let store = store_with(&[]);
        let reply = handle_client_message(
            ClientMessage::Subscribe {
                session_id: Some("later".to_string()),
            },
            &store,
        );
        assert_eq!(reply.frames.len(), 1);
        assert!(reply.interest.is_some());
    }

    #[test]
    fn test_subscribe_rejects_bad_id() {
        let store = store_with(&[]);
        let reply = handle_client_message(
            ClientMessage::Subscribe {
                session_id: Some("bad id!".to_string()),
            },
            &store,
        );
        assert!(reply.interest.is_none());
        assert!(matches!(&reply.frames[0], ServerMessage::Error { code, .. } if code == "invalid_input"));
    }

    #[test]
    fn test_unsubscribe() {
        let store = store_with(&[]);
        let reply = handle_client_message(
            ClientMessage::Unsubscribe {
                session_id: Some("c1".to_string()),
            },
            &store,
        );
        assert_eq!(reply.interest, Some(InterestUpdate::Unsubscribe("c1".to_string())));

        let reply = handle_client_message(ClientMessage::Unsubscribe { session_id: None }, &store);
        assert_eq!(reply.interest, Some(InterestUpdate::UnsubscribeAll));
    }

    #[test]
    fn test_get() {
        let store = store_with(&[("c1", CallState::Answered)]);
        let reply = handle_client_message(
            ClientMessage::Get {
                session_id: "c1".to_string(),
            },
            &store,
        );
        assert!(matches!(&reply.frames[0], ServerMessage::Session { session } if session.id == "c1"));

        let reply = handle_client_message(
            ClientMessage::Get {
                session_id: "missing".to_string(),
            },
            &store,
        );
        assert!(matches!(&reply.frames[0], ServerMessage::Error { code, .. } if code == "not_found"));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let store = store_with(&[
            ("c2", CallState::Answered),
            ("c1", CallState::Completed),
            ("c3", CallState::Answered),
        ]);
        let reply = handle_client_message(
            ClientMessage::List {
                state: Some(CallState::Answered),
            },
            &store,
        );
        let ServerMessage::Sessions { sessions } = &reply.frames[0] else {
            panic!("expected sessions frame");
        };
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);

        let reply = handle_client_message(ClientMessage::List { state: None }, &store);
        let ServerMessage::Sessions { sessions } = &reply.frames[0] else {
            panic!("expected sessions frame");
        };
        assert_eq!(sessions.len(), 3);
    }

    #[test]
    fn test_ping_and_repeat_auth() {
        let store = store_with(&[]);
        assert_eq!(
            handle_client_message(ClientMessage::Ping, &store).frames,
            vec![ServerMessage::Pong]
        );
        let reply = handle_client_message(
            ClientMessage::Auth {
                token: "t".to_string(),
            },
            &store,
        );
        assert!(matches!(&reply.frames[0], ServerMessage::Error { .. }));
    }
}
