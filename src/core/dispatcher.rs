//! Command dispatcher
//!
//! Turns validated API commands into provider calls. Every command against an
//! existing call follows the same discipline:
//!
//! 1. validate the input shape
//! 2. in one store `upsert`, reject terminal sessions and sessions that already
//!    have a pending action, otherwise record a new pending action
//! 3. call the provider under a timeout
//! 4. on success or provider error, clear that pending action; on timeout
//!    leave it for the reconciliation sweep
//!
//! `make_call` is the exception: no session exists until the provider returns
//! the call's UUID.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::core::error::{SessionError, SessionResult};
use crate::core::metrics::{GatewayMetrics, ProviderOutcome};
use crate::core::provider::{
    ConferenceOp, PlaceCallRequest, ProviderResult, SpeakRequest, TransferTarget, VoiceProvider,
};
use crate::core::session::{
    ActionKind, CallSession, ConferenceSession, Direction, PendingAction, SessionStore,
};
use crate::utils::validation::{
    normalize_e164, validate_call_id, validate_dtmf, validate_http_url, validate_id,
    validate_speak_text,
};

/// Default time allowed for one provider call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit on text-to-speech input
pub const DEFAULT_MAX_SPEAK_CHARS: usize = 1500;

/// Dispatcher settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub provider_timeout: Duration,
    /// Caller id used when a request does not name one
    pub default_from: Option<String>,
    pub answer_url: Option<String>,
    pub event_url: Option<String>,
    pub max_speak_chars: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            default_from: None,
            answer_url: None,
            event_url: None,
            max_speak_chars: DEFAULT_MAX_SPEAK_CHARS,
        }
    }
}

/// Body of `POST /calls`.
#[derive(Debug, Clone, Deserialize)]
pub struct MakeCallRequest {
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
}

/// Issues provider commands and keeps pending actions consistent with them.
pub struct CommandDispatcher {
    store: Arc<SessionStore>,
    provider: Arc<dyn VoiceProvider>,
    metrics: Arc<GatewayMetrics>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn VoiceProvider>,
        metrics: Arc<GatewayMetrics>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            provider,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub async fn make_call(&self, request: MakeCallRequest) -> SessionResult<CallSession> {
        let to = normalize_e164(&request.to)?;
        let from = match request.from.as_deref().or(self.config.default_from.as_deref()) {
            Some(from) => normalize_e164(from)?,
            None => {
                return Err(SessionError::InvalidInput(
                    "no caller id given and none configured".to_string(),
                ));
            }
        };

        let place = PlaceCallRequest {
            to: to.clone(),
            from: from.clone(),
            answer_url: self.config.answer_url.clone(),
            event_url: self.config.event_url.clone(),
        };
        self.metrics.record_command();
        let placed = self
            .timed("place_call", self.provider.place_call(&place))
            .await
            .inspect_err(|err| {
                if let SessionError::Timeout(_) = err {
                    warn!(%to, "Outbound call unconfirmed; session will be created from its first webhook");
                }
            })?;
        validate_call_id(&placed.uuid).map_err(|_| SessionError::ProviderError {
            code: "invalid_response".to_string(),
            message: format!("provider returned unusable call id '{}'", placed.uuid),
        })?;

        let now = OffsetDateTime::now_utc();
        let outcome = self.store.upsert_with_retry(&placed.uuid, |current| {
            if current.is_some() {
                // A webhook for this call got here first
                return Ok(None);
            }
            let mut session = CallSession::new(placed.uuid.clone(), Direction::Outbound, now);
            session.add_participant(&from);
            session.add_participant(&to);
            session.conversation_id = placed.conversation_uuid.clone();
            Ok(Some(session))
        })?;

        info!(call_id = %outcome.session.id, %to, "Outbound call placed");
        Ok(outcome.session)
    }

    pub async fn answer_call(&self, call_id: &str) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        self.run_action(call_id, ActionKind::Answer, self.provider.answer(call_id))
            .await
    }

    pub async fn hangup_call(&self, call_id: &str) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        self.run_action(call_id, ActionKind::Hangup, self.provider.hangup(call_id))
            .await
    }

    pub async fn transfer_call(
        &self,
        call_id: &str,
        target: &TransferTarget,
    ) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        let target = match target {
            TransferTarget::Phone { number } => TransferTarget::Phone {
                number: normalize_e164(number)?,
            },
            TransferTarget::Url { url } => {
                validate_http_url(url).map_err(SessionError::InvalidInput)?;
                target.clone()
            }
        };
        self.run_action(
            call_id,
            ActionKind::Transfer,
            self.provider.transfer(call_id, &target),
        )
        .await
    }

    pub async fn send_dtmf(&self, call_id: &str, digits: &str) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        validate_dtmf(digits)?;
        self.run_action(
            call_id,
            ActionKind::SendDtmf,
            self.provider.send_digits(call_id, digits),
        )
        .await
    }

    pub async fn start_recording(&self, call_id: &str) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        self.run_action(
            call_id,
            ActionKind::StartRecording,
            self.provider.start_recording(call_id),
        )
        .await
    }

    pub async fn stop_recording(&self, call_id: &str) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        self.run_action(
            call_id,
            ActionKind::StopRecording,
            self.provider.stop_recording(call_id),
        )
        .await
    }

    pub async fn speak(&self, call_id: &str, request: &SpeakRequest) -> SessionResult<CallSession> {
        validate_call_id(call_id)?;
        validate_speak_text(&request.text, self.config.max_speak_chars)?;
        self.run_action(
            call_id,
            ActionKind::Speak,
            self.provider.speak(call_id, request),
        )
        .await
    }

    // =========================================================================
    // Conferences
    // =========================================================================

    pub fn create_conference(&self, name: Option<String>) -> SessionResult<ConferenceSession> {
        if let Some(name) = &name
            && (name.trim().is_empty() || name.len() > 256)
        {
            return Err(SessionError::InvalidInput(
                "conference name must be 1-256 characters".to_string(),
            ));
        }
        let conference = self
            .store
            .conferences()
            .create(name, OffsetDateTime::now_utc());
        info!(conference_id = %conference.id, "Conference created");
        Ok(conference)
    }

    pub async fn join_conference(
        &self,
        conference_id: &str,
        call_id: &str,
    ) -> SessionResult<ConferenceSession> {
        validate_id("conference", conference_id)?;
        validate_call_id(call_id)?;
        self.store.conferences().check_join(conference_id, call_id)?;

        self.run_action(
            call_id,
            ActionKind::ConferenceJoin,
            self.provider
                .conference_op(conference_id, call_id, ConferenceOp::Join),
        )
        .await?;
        self.store
            .conferences()
            .join(conference_id, call_id, OffsetDateTime::now_utc())
    }

    pub async fn leave_conference(
        &self,
        conference_id: &str,
        call_id: &str,
    ) -> SessionResult<ConferenceSession> {
        validate_id("conference", conference_id)?;
        validate_call_id(call_id)?;
        self.store.conferences().check_member(conference_id, call_id)?;

        self.run_action(
            call_id,
            ActionKind::ConferenceLeave,
            self.provider
                .conference_op(conference_id, call_id, ConferenceOp::Leave),
        )
        .await?;
        self.store
            .conferences()
            .leave(conference_id, call_id, OffsetDateTime::now_utc())
    }

    pub async fn mute_participant(
        &self,
        conference_id: &str,
        call_id: &str,
    ) -> SessionResult<ConferenceSession> {
        self.set_muted(conference_id, call_id, true).await
    }

    pub async fn unmute_participant(
        &self,
        conference_id: &str,
        call_id: &str,
    ) -> SessionResult<ConferenceSession> {
        self.set_muted(conference_id, call_id, false).await
    }

    async fn set_muted(
        &self,
        conference_id: &str,
        call_id: &str,
        muted: bool,
    ) -> SessionResult<ConferenceSession> {
        validate_id("conference", conference_id)?;
        validate_call_id(call_id)?;
        self.store.conferences().check_member(conference_id, call_id)?;

        let (kind, op) = if muted {
            (ActionKind::ConferenceMute, ConferenceOp::Mute)
        } else {
            (ActionKind::ConferenceUnmute, ConferenceOp::Unmute)
        };
        self.run_action(
            call_id,
            kind,
            self.provider.conference_op(conference_id, call_id, op),
        )
        .await?;
        self.store
            .conferences()
            .set_muted(conference_id, call_id, muted, OffsetDateTime::now_utc())
    }

    // =========================================================================
    // Pending-action discipline
    // =========================================================================

    async fn run_action<F>(
        &self,
        call_id: &str,
        kind: ActionKind,
        call: F,
    ) -> SessionResult<CallSession>
    where
        F: Future<Output = ProviderResult<()>>,
    {
        let pending = match self.mark_pending(call_id, kind) {
            Ok(pending) => pending,
            Err(err) => {
                self.metrics.record_rejected_command();
                debug!(call_id, %kind, error = %err, "Command rejected");
                return Err(err);
            }
        };
        self.metrics.record_command();

        match self.timed(kind.as_str(), call).await {
            Ok(()) => {
                info!(call_id, %kind, "Provider accepted command");
                self.clear_pending(call_id, &pending)
            }
            Err(SessionError::Timeout(op)) => {
                // Left pending; the sweep resolves it
                Err(SessionError::Timeout(op))
            }
            Err(err) => {
                let _ = self.clear_pending(call_id, &pending);
                Err(err)
            }
        }
    }

    fn mark_pending(&self, call_id: &str, kind: ActionKind) -> SessionResult<PendingAction> {
        let now = OffsetDateTime::now_utc();
        let pending = PendingAction::new(kind, now);
        self.store.upsert_with_retry(call_id, |current| {
            let session = current.ok_or_else(|| SessionError::NotFound(call_id.to_string()))?;
            if session.is_terminal() {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    event: kind.as_str().to_string(),
                });
            }
            if let Some(existing) = &session.pending_action {
                return Err(SessionError::ActionInProgress {
                    call_id: call_id.to_string(),
                    pending: existing.kind,
                });
            }
            let mut next = session.clone();
            next.pending_action = Some(pending.clone());
            next.updated_at = now;
            Ok(Some(next))
        })?;
        Ok(pending)
    }

    /// Clear `pending` if it is still the session's pending action.
    fn clear_pending(&self, call_id: &str, pending: &PendingAction) -> SessionResult<CallSession> {
        let outcome = self.store.upsert_with_retry(call_id, |current| {
            let session = current.ok_or_else(|| SessionError::NotFound(call_id.to_string()))?;
            match &session.pending_action {
                Some(current) if current.id == pending.id => {
                    let mut next = session.clone();
                    next.pending_action = None;
                    next.updated_at = OffsetDateTime::now_utc();
                    Ok(Some(next))
                }
                // Already resolved by a webhook or the sweep
                _ => Ok(None),
            }
        });
        match outcome {
            Ok(outcome) => Ok(outcome.session),
            Err(err) => {
                if matches!(err, SessionError::Conflict(_)) {
                    self.metrics.record_conflict();
                }
                warn!(call_id, kind = %pending.kind, error = %err, "Could not clear pending action");
                Err(err)
            }
        }
    }

    /// Run one provider call under the configured timeout.
    async fn timed<T, F>(&self, op: &str, call: F) -> SessionResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(Ok(value)) => {
                self.metrics
                    .record_provider_call(started.elapsed(), ProviderOutcome::Ok);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.metrics
                    .record_provider_call(started.elapsed(), ProviderOutcome::Error);
                warn!(op, code = %err.code, message = %err.message, "Provider call failed");
                Err(err.into())
            }
            Err(_) => {
                self.metrics
                    .record_provider_call(started.elapsed(), ProviderOutcome::Timeout);
                warn!(
                    op,
                    timeout_ms = self.config.provider_timeout.as_millis() as u64,
                    "Provider call timed out"
                );
                Err(SessionError::Timeout(op.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::provider::{PlacedCall, ProviderError};
    use crate::core::reconcile::{ReconciliationSweeper, SweepConfig};
    use crate::core::session::CallState;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted provider: records calls and answers with the configured behaviour.
    #[derive(Default)]
    pub(crate) struct ScriptedProvider {
        pub calls: Mutex<Vec<String>>,
        pub fail_with: Mutex<Option<ProviderError>>,
        pub delay: Mutex<Option<Duration>>,
        pub placed_uuid: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        async fn respond(&self, call: String) -> ProviderResult<()> {
            self.calls.lock().push(call);
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self.fail_with.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl VoiceProvider for ScriptedProvider {
        async fn place_call(&self, request: &PlaceCallRequest) -> ProviderResult<PlacedCall> {
            self.respond(format!("place_call:{}", request.to)).await?;
            Ok(PlacedCall {
                uuid: self
                    .placed_uuid
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "placed-1".to_string()),
                conversation_uuid: Some("conv-1".to_string()),
                status: Some("started".to_string()),
            })
        }
        async fn answer(&self, call_id: &str) -> ProviderResult<()> {
            self.respond(format!("answer:{call_id}")).await
        }
        async fn hangup(&self, call_id: &str) -> ProviderResult<()> {
            self.respond(format!("hangup:{call_id}")).await
        }
        async fn transfer(&self, call_id: &str, _target: &TransferTarget) -> ProviderResult<()> {
            self.respond(format!("transfer:{call_id}")).await
        }
        async fn send_digits(&self, call_id: &str, digits: &str) -> ProviderResult<()> {
            self.respond(format!("dtmf:{call_id}:{digits}")).await
        }
        async fn start_recording(&self, call_id: &str) -> ProviderResult<()> {
            self.respond(format!("start_recording:{call_id}")).await
        }
        async fn stop_recording(&self, call_id: &str) -> ProviderResult<()> {
            self.respond(format!("stop_recording:{call_id}")).await
        }
        async fn speak(&self, call_id: &str, _request: &SpeakRequest) -> ProviderResult<()> {
            self.respond(format!("speak:{call_id}")).await
        }
        async fn conference_op(
            &self,
            conference_id: &str,
            call_id: &str,
            op: ConferenceOp,
        ) -> ProviderResult<()> {
            self.respond(format!("{}:{conference_id}:{call_id}", op.as_str()))
                .await
        }
    }

    struct Fixture {
        store: Arc<SessionStore>,
        provider: Arc<ScriptedProvider>,
        dispatcher: CommandDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::default());
        let provider = Arc::new(ScriptedProvider::default());
        let dispatcher = CommandDispatcher::new(
            store.clone(),
            provider.clone(),
            Arc::new(GatewayMetrics::new()),
            DispatcherConfig {
                provider_timeout: Duration::from_millis(50),
                default_from: Some("+14155550199".to_string()),
                ..Default::default()
            },
        );
        Fixture {
            store,
            provider,
            dispatcher,
        }
    }

    fn seed(store: &SessionStore, id: &str, state: CallState) {
        store
            .upsert(id, |_| {
                let mut session =
                    CallSession::new(id, Direction::Outbound, OffsetDateTime::now_utc());
                session.state = state;
                Ok(Some(session))
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_make_call_creates_outbound_session() {
        let f = fixture();
        let session = f
            .dispatcher
            .make_call(MakeCallRequest {
                to: "+14155550100".to_string(),
                from: None,
            })
            .await
            .unwrap();
        assert_eq!(session.id, "placed-1");
        assert_eq!(session.state, CallState::Initiating);
        assert_eq!(session.direction, Direction::Outbound);
        assert_eq!(session.participants, vec!["14155550199", "14155550100"]);
        assert!(f.store.contains("placed-1"));
    }

    #[tokio::test]
    async fn test_make_call_rejects_bad_number_before_provider() {
        let f = fixture();
        let result = f
            .dispatcher
            .make_call(MakeCallRequest {
                to: "not-a-number".to_string(),
                from: None,
            })
            .await;
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
        assert!(f.provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_make_call_timeout_creates_no_session() {
        let f = fixture();
        *f.provider.delay.lock() = Some(Duration::from_millis(200));
        let result = f
            .dispatcher
            .make_call(MakeCallRequest {
                to: "+14155550100".to_string(),
                from: None,
            })
            .await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_success_clears_pending() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        let session = f.dispatcher.start_recording("c1").await.unwrap();
        assert!(session.pending_action.is_none());
        assert_eq!(*f.provider.calls.lock(), vec!["start_recording:c1"]);
    }

    #[tokio::test]
    async fn test_provider_error_clears_pending_and_keeps_code() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        *f.provider.fail_with.lock() = Some(ProviderError::new("call_not_live", "gone"));

        let err = f.dispatcher.hangup_call("c1").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::ProviderError {
                code: "call_not_live".to_string(),
                message: "gone".to_string()
            }
        );
        assert!(f.store.get("c1").unwrap().pending_action.is_none());
    }

    #[tokio::test]
    async fn test_timeout_keeps_pending() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        *f.provider.delay.lock() = Some(Duration::from_millis(200));

        let err = f.dispatcher.hangup_call("c1").await.unwrap_err();
        assert_eq!(err, SessionError::Timeout("hangup".to_string()));
        let pending = f.store.get("c1").unwrap().pending_action.unwrap();
        assert_eq!(pending.kind, ActionKind::Hangup);
    }

    #[tokio::test]
    async fn test_start_recording_blocked_then_allowed() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);

        // A transfer times out and stays pending
        *f.provider.delay.lock() = Some(Duration::from_millis(200));
        let target = TransferTarget::Phone {
            number: "14155550123".to_string(),
        };
        assert!(matches!(
            f.dispatcher.transfer_call("c1", &target).await,
            Err(SessionError::Timeout(_))
        ));
        *f.provider.delay.lock() = None;

        match f.dispatcher.start_recording("c1").await {
            Err(SessionError::ActionInProgress { pending, .. }) => {
                assert_eq!(pending, ActionKind::Transfer)
            }
            other => panic!("expected ActionInProgress, got {other:?}"),
        }

        // A webhook resolving the transfer frees the call
        f.store
            .upsert("c1", |current| {
                let mut next = current.unwrap().clone();
                next.pending_action = None;
                Ok(Some(next))
            })
            .unwrap();

        assert!(f.dispatcher.start_recording("c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_retry_after_sweep_clears_timeout() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);

        *f.provider.delay.lock() = Some(Duration::from_millis(200));
        assert!(matches!(
            f.dispatcher.start_recording("c1").await,
            Err(SessionError::Timeout(_))
        ));
        *f.provider.delay.lock() = None;

        match f.dispatcher.start_recording("c1").await {
            Err(SessionError::ActionInProgress { pending, .. }) => {
                assert_eq!(pending, ActionKind::StartRecording)
            }
            other => panic!("expected ActionInProgress, got {other:?}"),
        }

        let sweeper = ReconciliationSweeper::new(
            f.store.clone(),
            Arc::new(GatewayMetrics::new()),
            SweepConfig::default(),
        );
        let report = sweeper.sweep_once(OffsetDateTime::now_utc() + Duration::from_secs(60));
        assert_eq!(report.expired, vec!["c1"]);

        let session = f.store.get("c1").unwrap();
        assert_eq!(session.state, CallState::Answered);
        assert!(session.pending_action.is_none());

        let session = f.dispatcher.start_recording("c1").await.unwrap();
        assert_eq!(session.state, CallState::Answered);
        assert_eq!(
            *f.provider.calls.lock(),
            vec!["start_recording:c1", "start_recording:c1"]
        );
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_commands() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Completed);
        let err = f.dispatcher.answer_call("c1").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                state: CallState::Completed,
                ..
            }
        ));
        assert!(f.provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let f = fixture();
        assert_eq!(
            f.dispatcher.hangup_call("ghost").await.unwrap_err(),
            SessionError::NotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn test_dtmf_charset_checked() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        assert!(matches!(
            f.dispatcher.send_dtmf("c1", "12x").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(f.dispatcher.send_dtmf("c1", "12#").await.is_ok());
    }

    #[tokio::test]
    async fn test_transfer_target_checked() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        let bad_url = TransferTarget::Url {
            url: "ftp://example.com/ncco".to_string(),
        };
        assert!(matches!(
            f.dispatcher.transfer_call("c1", &bad_url).await,
            Err(SessionError::InvalidInput(_))
        ));
        let bad_number = TransferTarget::Phone {
            number: "12".to_string(),
        };
        assert!(matches!(
            f.dispatcher.transfer_call("c1", &bad_number).await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(f.provider.calls.lock().is_empty());

        let phone = TransferTarget::Phone {
            number: "+1 415 555 0100".to_string(),
        };
        assert!(f.dispatcher.transfer_call("c1", &phone).await.is_ok());
    }

    #[tokio::test]
    async fn test_conference_membership_flow() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        let first = f.dispatcher.create_conference(Some("a".to_string())).unwrap();
        let second = f.dispatcher.create_conference(None).unwrap();

        let joined = f.dispatcher.join_conference(&first.id, "c1").await.unwrap();
        assert_eq!(joined.participants, vec!["c1"]);

        assert!(matches!(
            f.dispatcher.join_conference(&second.id, "c1").await,
            Err(SessionError::ParticipantBusy { .. })
        ));

        let muted = f.dispatcher.mute_participant(&first.id, "c1").await.unwrap();
        assert_eq!(muted.muted.get("c1"), Some(&true));
        let unmuted = f
            .dispatcher
            .unmute_participant(&first.id, "c1")
            .await
            .unwrap();
        assert_eq!(unmuted.muted.get("c1"), Some(&false));

        let left = f.dispatcher.leave_conference(&first.id, "c1").await.unwrap();
        assert!(left.participants.is_empty());
        assert!(f.dispatcher.join_conference(&second.id, "c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_join_leaves_membership_unchanged() {
        let f = fixture();
        seed(&f.store, "c1", CallState::Answered);
        let conference = f.dispatcher.create_conference(None).unwrap();
        *f.provider.fail_with.lock() = Some(ProviderError::new("400", "nope"));

        assert!(f.dispatcher.join_conference(&conference.id, "c1").await.is_err());
        assert!(f.store.conferences().conference_of("c1").is_none());
    }
}
