//! Webhook ingestion pipeline: normalize, apply through the state machine
//! inside a store upsert, then log and count the outcome.
//!
//! Callers on the HTTP edge swallow every error returned here; the provider
//! always gets a 200.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::core::error::{SessionError, SessionResult};
use crate::core::events::{EventKind, EventNormalizer, NormalizedEvent, SourceKind};
use crate::core::metrics::GatewayMetrics;
use crate::core::session::{CallSession, Direction, SessionStore};
use crate::core::state_machine::{self, IgnoreReason, Transition};

/// What happened to one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored; `created` is true when the delivery opened a new session
    Applied { session: CallSession, created: bool },
    /// Accepted without effect
    Ignored(IgnoreReason),
}

/// Feeds webhook deliveries into the session store.
#[derive(Clone)]
pub struct EventIngestor {
    store: Arc<SessionStore>,
    normalizer: EventNormalizer,
    metrics: Arc<GatewayMetrics>,
}

impl EventIngestor {
    pub fn new(
        store: Arc<SessionStore>,
        normalizer: EventNormalizer,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            normalizer,
            metrics,
        }
    }

    /// Normalize and apply a raw webhook body.
    pub fn ingest(&self, raw: &serde_json::Value, source: SourceKind) -> SessionResult<IngestOutcome> {
        self.metrics.record_webhook();
        let event = self.normalizer.normalize(raw, source).inspect_err(|err| {
            self.metrics.record_malformed();
            warn!(%source, error = %err, "Dropping malformed webhook");
        })?;
        self.apply(&event)
    }

    /// Normalize and apply a raw webhook body as received on the wire.
    pub fn ingest_slice(&self, body: &[u8], source: SourceKind) -> SessionResult<IngestOutcome> {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(raw) => self.ingest(&raw, source),
            Err(e) => {
                self.metrics.record_webhook();
                self.metrics.record_malformed();
                warn!(%source, error = %e, "Dropping webhook with invalid JSON body");
                Err(SessionError::MalformedPayload(format!("invalid JSON: {e}")))
            }
        }
    }

    /// Normalize and apply a webhook that may carry no provider timestamp,
    /// such as an answer webhook delivered as a GET query.
    ///
    /// An event without ordering information is applied against the current
    /// record but leaves its sequence watermark where it was.
    pub fn ingest_unsequenced(
        &self,
        raw: &serde_json::Value,
        source: SourceKind,
        received_at: OffsetDateTime,
    ) -> SessionResult<IngestOutcome> {
        self.metrics.record_webhook();
        let event = self
            .normalizer
            .normalize_unsequenced(raw, source, received_at)
            .inspect_err(|err| {
                self.metrics.record_malformed();
                warn!(%source, error = %err, "Dropping malformed webhook");
            })?;
        self.apply(&event)
    }

    /// Apply an already-normalized event.
    pub fn apply(&self, event: &NormalizedEvent) -> SessionResult<IngestOutcome> {
        let call_id = event.call_id();
        let now = OffsetDateTime::now_utc();
        let mut ignored = None;
        let mut created = false;

        let result = self.store.upsert_with_retry(call_id, |current| {
            ignored = None;
            created = current.is_none();
            let base = match current {
                Some(session) => session.clone(),
                None => {
                    let direction = direction_for_new_session(event)
                        .ok_or_else(|| SessionError::NotFound(call_id.to_string()))?;
                    CallSession::new(call_id, direction, now)
                }
            };

            let transition = if event.is_sequenced() {
                state_machine::apply(&base, event, now)?
            } else {
                let placed = event.at_sequence(base.last_event_seq + 1);
                match state_machine::apply(&base, &placed, now)? {
                    Transition::Applied(mut next) => {
                        next.last_event_seq = base.last_event_seq;
                        Transition::Applied(next)
                    }
                    ignored => ignored,
                }
            };

            match transition {
                Transition::Applied(next) => Ok(Some(next)),
                Transition::Ignored(reason) => {
                    ignored = Some(reason);
                    Ok(None)
                }
            }
        });

        match result {
            Ok(outcome) => match ignored {
                Some(reason) => {
                    match reason {
                        IgnoreReason::Stale { last_seq } => {
                            self.metrics.record_stale();
                            debug!(call_id, seq = event.sequence(), last_seq, "Ignoring stale event");
                        }
                        IgnoreReason::Terminal(state) => {
                            self.metrics.record_after_terminal();
                            info!(call_id, %state, event = %event.kind().label(), "Event after terminal state ignored");
                        }
                    }
                    Ok(IngestOutcome::Ignored(reason))
                }
                None => {
                    self.metrics.record_applied();
                    info!(
                        call_id,
                        state = %outcome.session.state,
                        seq = event.sequence(),
                        event = %event.kind().label(),
                        created,
                        "Session transition applied"
                    );
                    Ok(IngestOutcome::Applied {
                        session: outcome.session,
                        created,
                    })
                }
            },
            Err(err) => {
                match &err {
                    SessionError::InvalidTransition { state, event: label } => {
                        self.metrics.record_invalid_transition();
                        warn!(call_id, %state, event = %label, seq = event.sequence(), "Invalid transition");
                    }
                    SessionError::Conflict(_) => {
                        self.metrics.record_conflict();
                        warn!(call_id, "Event dropped after repeated write conflicts");
                    }
                    SessionError::NotFound(_) => {
                        debug!(call_id, event = %event.kind().label(), "Event for unknown call dropped");
                    }
                    other => warn!(call_id, error = %other, "Event could not be applied"),
                }
                Err(err)
            }
        }
    }
}

/// Direction to open a session with when a webhook names an unknown call.
///
/// The answer webhook is how an inbound call announces itself. Other webhooks
/// only open a session when they say which way the call goes, which covers an
/// outbound call whose `make_call` response was lost to a timeout.
fn direction_for_new_session(event: &NormalizedEvent) -> Option<Direction> {
    match event.kind() {
        EventKind::Answer { .. } => Some(event.legs().direction.unwrap_or(Direction::Inbound)),
        _ => event.legs().direction,
    }
}
