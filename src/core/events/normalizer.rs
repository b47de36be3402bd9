use std::time::Duration;

use moka::sync::Cache;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use super::payload::{RawTimestamp, RawWebhook};
use super::types::{
    CallPhase, CallStatus, EventKind, EventLegs, NormalizedEvent, RecordingPhase, SourceKind,
    UNSEQUENCED,
};
use crate::core::error::{SessionError, SessionResult};
use crate::core::session::{Direction, RecordingRef};

/// Default lifetime of a dedup entry
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

/// Default number of (call, event id) pairs remembered
pub const DEFAULT_DEDUP_CAPACITY: u64 = 100_000;

/// Turns provider webhook bodies into [`NormalizedEvent`]s.
///
/// When the provider supplies an event id, the first normalization of a
/// `(call uuid, event id)` pair is cached and re-deliveries return that same
/// event. Idempotent application is still the state machine's job.
#[derive(Clone)]
pub struct EventNormalizer {
    seen: Cache<(String, String), NormalizedEvent>,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL, DEFAULT_DEDUP_CAPACITY)
    }
}

impl EventNormalizer {
    pub fn new(dedup_ttl: Duration, capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(dedup_ttl)
                .build(),
        }
    }

    /// Parse a raw body and normalize it.
    pub fn normalize_slice(&self, body: &[u8], source: SourceKind) -> SessionResult<NormalizedEvent> {
        let raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| SessionError::MalformedPayload(format!("invalid JSON: {e}")))?;
        self.normalize(&raw, source)
    }

    pub fn normalize(
        &self,
        raw: &serde_json::Value,
        source: SourceKind,
    ) -> SessionResult<NormalizedEvent> {
        self.normalize_inner(raw, source, None)
    }

    /// Normalize a payload that may lack a provider timestamp.
    ///
    /// Without a timestamp the event takes `received_at` as its time and
    /// carries no sequence number unless the payload has one, so it cannot
    /// reorder events stamped by the provider.
    pub fn normalize_unsequenced(
        &self,
        raw: &serde_json::Value,
        source: SourceKind,
        received_at: OffsetDateTime,
    ) -> SessionResult<NormalizedEvent> {
        self.normalize_inner(raw, source, Some(received_at))
    }

    fn normalize_inner(
        &self,
        raw: &serde_json::Value,
        source: SourceKind,
        received_at: Option<OffsetDateTime>,
    ) -> SessionResult<NormalizedEvent> {
        let payload = RawWebhook::deserialize(raw)
            .map_err(|e| SessionError::MalformedPayload(e.to_string()))?;

        let call_id = payload
            .uuid
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SessionError::MalformedPayload("missing call uuid".to_string()))?
            .to_string();

        let dedup_key = payload
            .event_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| (call_id.clone(), id.clone()));
        if let Some(key) = &dedup_key
            && let Some(previous) = self.seen.get(key)
        {
            debug!(call_id = %call_id, event_id = %key.1, "Duplicate webhook delivery");
            return Ok(previous);
        }

        let (timestamp, stamped) = match (payload.timestamp.as_ref(), received_at) {
            (None, Some(received_at)) => (received_at, false),
            (raw_ts, _) => (parse_timestamp(raw_ts)?, true),
        };
        let sequence = match payload.sequence {
            Some(0) => {
                return Err(SessionError::MalformedPayload(
                    "sequence must be positive".to_string(),
                ));
            }
            Some(seq) => seq,
            None if stamped => sequence_from_timestamp(timestamp)?,
            None => UNSEQUENCED,
        };

        let kind = event_kind(&payload, source)?;
        let legs = EventLegs {
            from: payload.from.as_ref().and_then(|e| e.leg()),
            to: payload.to.as_ref().and_then(|e| e.leg()),
            conversation_id: payload.conversation_uuid.clone(),
            direction: match payload.direction.as_deref().map(str::parse::<Direction>) {
                Some(Ok(direction)) => Some(direction),
                _ if source == SourceKind::Answer => Some(Direction::Inbound),
                _ => None,
            },
        };

        let mut event = NormalizedEvent::new(call_id, timestamp, sequence, kind).with_legs(legs);
        if let Some(key) = dedup_key {
            event = event.with_event_id(key.1.clone());
            self.seen.insert(key, event.clone());
        }
        Ok(event)
    }
}

fn parse_timestamp(raw: Option<&RawTimestamp>) -> SessionResult<OffsetDateTime> {
    let from_millis = |ms: i64| {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
            .map_err(|e| SessionError::MalformedPayload(format!("timestamp out of range: {e}")))
    };

    match raw {
        None => Err(SessionError::MalformedPayload(
            "missing timestamp".to_string(),
        )),
        Some(RawTimestamp::Millis(ms)) => from_millis(*ms),
        Some(RawTimestamp::Text(text)) => {
            let text = text.trim();
            if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
                return Ok(ts);
            }
            match text.parse::<i64>() {
                Ok(ms) => from_millis(ms),
                Err(_) => Err(SessionError::MalformedPayload(format!(
                    "unrecognised timestamp '{text}'"
                ))),
            }
        }
    }
}

/// Epoch microseconds, used when the provider sends no explicit sequence.
fn sequence_from_timestamp(ts: OffsetDateTime) -> SessionResult<u64> {
    u64::try_from(ts.unix_timestamp_nanos() / 1_000)
        .ok()
        .filter(|micros| *micros > 0)
        .ok_or_else(|| SessionError::MalformedPayload("timestamp precedes epoch".to_string()))
}

fn event_kind(payload: &RawWebhook, source: SourceKind) -> SessionResult<EventKind> {
    let status = payload.status.as_deref().map(str::to_ascii_lowercase);

    match source {
        SourceKind::Answer => {
            let phase = match status.as_deref() {
                None | Some("ringing") | Some("started") => CallPhase::Ringing,
                Some("answered") => CallPhase::Answered,
                Some(other) => {
                    return Err(SessionError::MalformedPayload(format!(
                        "unexpected answer status '{other}'"
                    )));
                }
            };
            Ok(EventKind::Answer { phase })
        }
        SourceKind::Event => {
            let status = status
                .ok_or_else(|| SessionError::MalformedPayload("missing status".to_string()))?;
            Ok(EventKind::Status {
                status: CallStatus::parse(&status),
            })
        }
        SourceKind::Recording => {
            let phase = match status.as_deref() {
                Some("started") | Some("recording") => RecordingPhase::Started,
                Some("stopped") => RecordingPhase::Stopped,
                Some("completed") => RecordingPhase::Completed,
                None if payload.recording_url.is_some() => RecordingPhase::Completed,
                None => {
                    return Err(SessionError::MalformedPayload(
                        "recording webhook without status or url".to_string(),
                    ));
                }
                Some(other) => {
                    return Err(SessionError::MalformedPayload(format!(
                        "unexpected recording status '{other}'"
                    )));
                }
            };
            Ok(EventKind::Recording {
                phase,
                recording: RecordingRef {
                    id: payload.recording_uuid.clone(),
                    url: payload.recording_url.clone(),
                },
            })
        }
        SourceKind::Dtmf => {
            let nested = payload.dtmf.clone().unwrap_or_default();
            let timed_out = nested.timed_out.unwrap_or(false);
            match nested.digits.or_else(|| payload.digits.clone()) {
                Some(digits) => Ok(EventKind::Dtmf { digits, timed_out }),
                None if timed_out => Ok(EventKind::Dtmf {
                    digits: String::new(),
                    timed_out,
                }),
                None => Err(SessionError::MalformedPayload(
                    "dtmf webhook without digits".to_string(),
                )),
            }
        }
        SourceKind::Error => Ok(EventKind::Error {
            reason: payload
                .reason
                .clone()
                .unwrap_or_else(|| "unknown provider error".to_string()),
        }),
    }
}
