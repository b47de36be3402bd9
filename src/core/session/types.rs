//! Call and conference session records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a call session.
///
/// `Completed`, `Failed` and `Cancelled` are absorbing: once entered, every
/// later event is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiating,
    Ringing,
    Answered,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Initiating => "initiating",
            CallState::Ringing => "ringing",
            CallState::Answered => "answered",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
            CallState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiating" => Ok(CallState::Initiating),
            "ringing" => Ok(CallState::Ringing),
            "answered" => Ok(CallState::Answered),
            "completed" => Ok(CallState::Completed),
            "failed" => Ok(CallState::Failed),
            "cancelled" => Ok(CallState::Cancelled),
            other => Err(format!("Unknown call state: {other}")),
        }
    }
}

/// Which side placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("Unknown direction: {other}")),
        }
    }
}

/// Command kinds that can be pending against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Answer,
    Hangup,
    Transfer,
    SendDtmf,
    StartRecording,
    StopRecording,
    Speak,
    ConferenceJoin,
    ConferenceLeave,
    ConferenceMute,
    ConferenceUnmute,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Answer => "answer",
            ActionKind::Hangup => "hangup",
            ActionKind::Transfer => "transfer",
            ActionKind::SendDtmf => "send_dtmf",
            ActionKind::StartRecording => "start_recording",
            ActionKind::StopRecording => "stop_recording",
            ActionKind::Speak => "speak",
            ActionKind::ConferenceJoin => "conference_join",
            ActionKind::ConferenceLeave => "conference_leave",
            ActionKind::ConferenceMute => "conference_mute",
            ActionKind::ConferenceUnmute => "conference_unmute",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command issued to the provider whose outcome is not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Token identifying this particular issue of the command
    pub id: String,
    pub kind: ActionKind,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl PendingAction {
    pub fn new(kind: ActionKind, now: OffsetDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            issued_at: now,
        }
    }

    /// True once the action has been outstanding longer than `grace`.
    pub fn is_expired(&self, now: OffsetDateTime, grace: Duration) -> bool {
        now - self.issued_at > grace
    }
}

/// Reference to a call recording held by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One telephone call tracked from initiation to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    /// Provider call UUID
    pub id: String,
    pub state: CallState,
    pub direction: Direction,
    /// Leg identifiers in first-seen order, no duplicates
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingRef>,
    pub recording_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dtmf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Sequence number of the last applied event
    pub last_event_seq: u64,
    /// Write counter used for compare-and-swap
    pub revision: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
}

impl CallSession {
    pub fn new(id: impl Into<String>, direction: Direction, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            state: CallState::Initiating,
            direction,
            participants: Vec::new(),
            conversation_id: None,
            recording: None,
            recording_active: false,
            last_dtmf: None,
            failure_reason: None,
            last_event_seq: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
            pending_action: None,
        }
    }

    /// Add a leg identifier, keeping first-seen order and skipping duplicates.
    pub fn add_participant(&mut self, leg: &str) {
        let leg = leg.trim();
        if !leg.is_empty() && !self.participants.iter().any(|p| p == leg) {
            self.participants.push(leg.to_string());
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            updated_at: self.updated_at,
        }
    }
}

/// Minimal view of a session pushed to realtime subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: CallState,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Filter applied by `SessionStore::list`. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub state: Option<CallState>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub has_pending: Option<bool>,
}

impl SessionFilter {
    pub fn matches(&self, session: &CallSession) -> bool {
        self.state.is_none_or(|s| s == session.state)
            && self.direction.is_none_or(|d| d == session.direction)
            && self
                .has_pending
                .is_none_or(|p| p == session.pending_action.is_some())
    }
}

/// A conference grouping several call sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceSession {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub participants: Vec<String>,
    /// Participant id -> muted
    pub muted: HashMap<String, bool>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last membership or mute change
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ConferenceSession {
    pub fn new(name: Option<String>, now: OffsetDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            participants: Vec::new(),
            muted: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.participants.iter().any(|p| p == participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CallState::Initiating.is_terminal());
        assert!(!CallState::Answered.is_terminal());
        assert!(CallState::Completed.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(CallState::Cancelled.is_terminal());
    }

    #[test]
    fn test_call_state_from_str_case_insensitive() {
        assert_eq!("Answered".parse::<CallState>(), Ok(CallState::Answered));
        assert!("recording".parse::<CallState>().is_err());
    }

    #[test]
    fn test_participants_are_an_ordered_set() {
        let mut session = CallSession::new("c1", Direction::Outbound, ts(0));
        session.add_participant("14155550100");
        session.add_participant("14155550199");
        session.add_participant("14155550100");
        session.add_participant("  ");
        assert_eq!(session.participants, vec!["14155550100", "14155550199"]);
    }

    #[test]
    fn test_pending_action_expiry() {
        let action = PendingAction::new(ActionKind::Hangup, ts(100));
        assert!(!action.is_expired(ts(110), Duration::from_secs(30)));
        assert!(action.is_expired(ts(131), Duration::from_secs(30)));
    }

    #[test]
    fn test_filter_matches() {
        let mut session = CallSession::new("c1", Direction::Inbound, ts(0));
        session.state = CallState::Ringing;

        assert!(SessionFilter::default().matches(&session));
        let by_state = SessionFilter {
            state: Some(CallState::Ringing),
            ..Default::default()
        };
        assert!(by_state.matches(&session));
        let pending_only = SessionFilter {
            has_pending: Some(true),
            ..Default::default()
        };
        assert!(!pending_only.matches(&session));
        let outbound = SessionFilter {
            direction: Some(Direction::Outbound),
            ..Default::default()
        };
        assert!(!outbound.matches(&session));
    }

    #[test]
    fn test_session_serializes_rfc3339_timestamps() {
        let session = CallSession::new("c1", Direction::Outbound, ts(0));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "initiating");
        assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
        assert!(json.get("pending_action").is_none());
    }
}
