//! Call session state machine.
//!
//! [`apply`] is a pure function from (session, event) to the next session. It
//! never touches the store; callers run it inside an `upsert` mutator so the
//! compare-and-swap decides which concurrent application wins.
//!
//! Ordering within a session is by event sequence number, not arrival order:
//! an event whose sequence is not newer than `last_event_seq` is ignored.
//! Terminal states absorb every later event.

use time::OffsetDateTime;

use crate::core::error::{SessionError, SessionResult};
use crate::core::events::{CallPhase, CallStatus, EventKind, NormalizedEvent, RecordingPhase};
use crate::core::session::{ActionKind, CallSession, CallState, RecordingRef};

/// Why an event was accepted without changing the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sequence not newer than the last applied event
    Stale { last_seq: u64 },
    /// Session already completed, failed or cancelled
    Terminal(CallState),
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session to store
    Applied(CallSession),
    /// Nothing to store
    Ignored(IgnoreReason),
}

impl Transition {
    pub fn applied(self) -> Option<CallSession> {
        match self {
            Transition::Applied(session) => Some(session),
            Transition::Ignored(_) => None,
        }
    }
}

/// Apply `event` to `session`, returning the next record or why it was ignored.
///
/// Fails with `InvalidTransition` when the (state, event) pair has no entry in
/// the transition table; the input session is never modified.
pub fn apply(
    session: &CallSession,
    event: &NormalizedEvent,
    now: OffsetDateTime,
) -> SessionResult<Transition> {
    if session.is_terminal() {
        return Ok(Transition::Ignored(IgnoreReason::Terminal(session.state)));
    }
    if event.sequence() <= session.last_event_seq {
        return Ok(Transition::Ignored(IgnoreReason::Stale {
            last_seq: session.last_event_seq,
        }));
    }

    let mut next = session.clone();
    next.state = next_state(session.state, event.kind()).ok_or_else(|| {
        SessionError::InvalidTransition {
            state: session.state,
            event: event.kind().label(),
        }
    })?;

    match event.kind() {
        EventKind::Recording { phase, recording } => {
            next.recording_active = *phase == RecordingPhase::Started;
            next.recording = Some(merge_recording(session.recording.as_ref(), recording));
        }
        EventKind::Dtmf { digits, timed_out } if !*timed_out || !digits.is_empty() => {
            next.last_dtmf = Some(digits.clone());
        }
        EventKind::Error { reason } => next.failure_reason = Some(reason.clone()),
        EventKind::Status { status } if next.state == CallState::Failed => {
            next.failure_reason = Some(status.as_str().to_string());
        }
        _ => {}
    }

    let legs = event.legs();
    for leg in [legs.from.as_deref(), legs.to.as_deref()].into_iter().flatten() {
        next.add_participant(leg);
    }
    if next.conversation_id.is_none() {
        next.conversation_id = legs.conversation_id.clone();
    }

    if next.is_terminal() {
        next.recording_active = false;
        next.pending_action = None;
    } else if let Some(pending) = &session.pending_action
        && resolves(pending.kind, session.state, &next, event.kind())
    {
        next.pending_action = None;
    }

    next.last_event_seq = event.sequence();
    next.updated_at = now;
    Ok(Transition::Applied(next))
}

/// Transition table. `None` means the pair is undefined.
fn next_state(state: CallState, kind: &EventKind) -> Option<CallState> {
    use CallState::*;

    match (state, kind) {
        (Initiating | Ringing, EventKind::Answer { phase: CallPhase::Ringing })
        | (Initiating | Ringing, EventKind::Status { status: CallStatus::Ringing }) => {
            Some(Ringing)
        }
        (Initiating, EventKind::Status { status: CallStatus::Started }) => Some(Initiating),
        (Initiating | Ringing | Answered, EventKind::Answer { phase: CallPhase::Answered })
        | (Initiating | Ringing | Answered, EventKind::Status { status: CallStatus::Answered }) => {
            Some(Answered)
        }
        (Answered, EventKind::Recording { .. }) => Some(Answered),
        (Answered, EventKind::Dtmf { .. }) => Some(Answered),
        (Answered, EventKind::Status { status: CallStatus::Completed }) => Some(Completed),
        (
            _,
            EventKind::Status {
                status: CallStatus::Failed | CallStatus::Busy | CallStatus::Timeout,
            },
        ) => Some(Failed),
        (
            Initiating | Ringing,
            EventKind::Status {
                status: CallStatus::Cancelled | CallStatus::Rejected | CallStatus::Unanswered,
            },
        ) => Some(Cancelled),
        (_, EventKind::Error { .. }) => Some(Failed),
        (_, EventKind::Status { status: CallStatus::Other(_) }) => Some(state),
        _ => None,
    }
}

/// Whether the event confirms the outstanding command.
fn resolves(pending: ActionKind, before: CallState, after: &CallSession, kind: &EventKind) -> bool {
    match pending {
        ActionKind::Answer => before != CallState::Answered && after.state == CallState::Answered,
        ActionKind::StartRecording => matches!(
            kind,
            EventKind::Recording {
                phase: RecordingPhase::Started,
                ..
            }
        ),
        ActionKind::StopRecording => matches!(
            kind,
            EventKind::Recording {
                phase: RecordingPhase::Stopped | RecordingPhase::Completed,
                ..
            }
        ),
        _ => false,
    }
}

fn merge_recording(current: Option<&RecordingRef>, update: &RecordingRef) -> RecordingRef {
    let current = current.cloned().unwrap_or_default();
    RecordingRef {
        id: update.id.clone().or(current.id),
        url: update.url.clone().or(current.url),
    }
}
