//! Canonical event types produced from provider webhooks.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::session::{Direction, RecordingRef};

/// Which webhook endpoint a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Answer,
    Event,
    Recording,
    Dtmf,
    Error,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Answer => "answer",
            SourceKind::Event => "event",
            SourceKind::Recording => "recording",
            SourceKind::Dtmf => "dtmf",
            SourceKind::Error => "error",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answer" => Ok(SourceKind::Answer),
            "event" => Ok(SourceKind::Event),
            "recording" => Ok(SourceKind::Recording),
            "dtmf" | "input" => Ok(SourceKind::Dtmf),
            "error" | "errors" => Ok(SourceKind::Error),
            other => Err(format!("Unknown webhook source: {other}")),
        }
    }
}

/// Call progress reported by the answer webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Ringing,
    Answered,
}

/// Status vocabulary of the event webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Started,
    Ringing,
    Answered,
    Completed,
    Failed,
    Busy,
    Timeout,
    Cancelled,
    Rejected,
    Unanswered,
    /// Informational statuses this service does not act on
    Other(String),
}

impl CallStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "started" => CallStatus::Started,
            "ringing" => CallStatus::Ringing,
            "answered" => CallStatus::Answered,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            "busy" => CallStatus::Busy,
            "timeout" => CallStatus::Timeout,
            "cancelled" | "canceled" => CallStatus::Cancelled,
            "rejected" => CallStatus::Rejected,
            "unanswered" => CallStatus::Unanswered,
            other => CallStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallStatus::Started => "started",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::Timeout => "timeout",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Rejected => "rejected",
            CallStatus::Unanswered => "unanswered",
            CallStatus::Other(s) => s,
        }
    }
}

/// Recording lifecycle reported by the recording webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPhase {
    Started,
    Stopped,
    /// Recording file is available
    Completed,
}

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Answer { phase: CallPhase },
    Status { status: CallStatus },
    Recording { phase: RecordingPhase, recording: RecordingRef },
    Dtmf { digits: String, timed_out: bool },
    Error { reason: String },
}

impl EventKind {
    /// Short label used in logs and `InvalidTransition` errors.
    pub fn label(&self) -> String {
        match self {
            EventKind::Answer { phase } => format!("answer({phase:?})").to_lowercase(),
            EventKind::Status { status } => format!("status({})", status.as_str()),
            EventKind::Recording { phase, .. } => format!("recording({phase:?})").to_lowercase(),
            EventKind::Dtmf { .. } => "dtmf".to_string(),
            EventKind::Error { .. } => "error".to_string(),
        }
    }
}

/// Call leg metadata carried alongside any event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventLegs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

/// Sequence of an event that carries no ordering information.
pub const UNSEQUENCED: u64 = 0;

/// A webhook payload in canonical form. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    call_id: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    legs: EventLegs,
    kind: EventKind,
}

impl NormalizedEvent {
    pub fn new(
        call_id: impl Into<String>,
        timestamp: OffsetDateTime,
        sequence: u64,
        kind: EventKind,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            timestamp,
            sequence,
            event_id: None,
            legs: EventLegs::default(),
            kind,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_legs(mut self, legs: EventLegs) -> Self {
        self.legs = legs;
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// False for events with no provider timestamp or sequence, which must
    /// not move a session's sequence watermark.
    pub fn is_sequenced(&self) -> bool {
        self.sequence != UNSEQUENCED
    }

    /// Copy of this event placed at `sequence`.
    pub fn at_sequence(&self, sequence: u64) -> Self {
        Self {
            sequence,
            ..self.clone()
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn legs(&self) -> &EventLegs {
        &self.legs
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_forward_compatible() {
        assert_eq!(CallStatus::parse("Answered"), CallStatus::Answered);
        assert_eq!(CallStatus::parse("canceled"), CallStatus::Cancelled);
        assert_eq!(
            CallStatus::parse("machine"),
            CallStatus::Other("machine".to_string())
        );
    }

    #[test]
    fn test_event_labels() {
        assert_eq!(
            EventKind::Answer {
                phase: CallPhase::Ringing
            }
            .label(),
            "answer(ringing)"
        );
        assert_eq!(
            EventKind::Status {
                status: CallStatus::Busy
            }
            .label(),
            "status(busy)"
        );
    }

    #[test]
    fn test_source_kind_aliases() {
        assert_eq!("input".parse::<SourceKind>(), Ok(SourceKind::Dtmf));
        assert_eq!("errors".parse::<SourceKind>(), Ok(SourceKind::Error));
        assert!("billing".parse::<SourceKind>().is_err());
    }
}
