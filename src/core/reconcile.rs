//! Reconciliation sweep
//!
//! Runs on a timer and resolves what webhooks did not:
//! - a pending action older than the grace period is cleared so the command
//!   can be retried, except an unacknowledged hangup, which evicts the
//!   session outright;
//! - terminal sessions are evicted once the retention window has passed;
//! - empty conferences are dropped after the same window.
//!
//! Evictions re-check the stored record under the shard lock, so a session
//! written after the snapshot is left for the next pass.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::SessionError;
use crate::core::metrics::GatewayMetrics;
use crate::core::session::{ActionKind, CallSession, SessionFilter, SessionStore};

pub const DEFAULT_PENDING_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub pending_grace: Duration,
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            pending_grace: DEFAULT_PENDING_GRACE,
            retention: DEFAULT_RETENTION,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions whose expired pending action was cleared
    pub expired: Vec<String>,
    /// Sessions removed from the store
    pub evicted: Vec<String>,
    /// Empty conferences removed from the registry
    pub evicted_conferences: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted.is_empty() && self.evicted_conferences.is_empty()
    }
}

pub struct ReconciliationSweeper {
    store: Arc<SessionStore>,
    metrics: Arc<GatewayMetrics>,
    config: SweepConfig,
}

impl ReconciliationSweeper {
    pub fn new(store: Arc<SessionStore>, metrics: Arc<GatewayMetrics>, config: SweepConfig) -> Self {
        Self {
            store,
            metrics,
            config,
        }
    }

    /// One pass over a snapshot of the store.
    pub fn sweep_once(&self, now: OffsetDateTime) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.store.list(&SessionFilter::default()) {
            if session.is_terminal() {
                if now - session.updated_at > self.config.retention
                    && self
                        .store
                        .delete_if(&session.id, |current| current.revision == session.revision)
                        .is_some()
                {
                    debug!(call_id = %session.id, state = %session.state, "Evicted terminal session");
                    report.evicted.push(session.id);
                }
                continue;
            }

            let Some(pending) = session
                .pending_action
                .as_ref()
                .filter(|p| p.is_expired(now, self.config.pending_grace))
            else {
                continue;
            };

            let token = pending.id.clone();
            let kind = pending.kind;

            if kind == ActionKind::Hangup {
                let still_pending = |current: &CallSession| {
                    current.pending_action.as_ref().is_some_and(|p| p.id == token)
                };
                if self.store.delete_if(&session.id, still_pending).is_some() {
                    warn!(call_id = %session.id, "Hangup never acknowledged; session evicted");
                    report.evicted.push(session.id);
                }
                continue;
            }

            let result = self.store.upsert_with_retry(&session.id, |current| {
                let Some(current) = current else {
                    return Err(SessionError::NotFound(session.id.clone()));
                };
                // Resolved since the snapshot was taken
                if current.pending_action.as_ref().is_none_or(|p| p.id != token) {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.pending_action = None;
                next.updated_at = now;
                Ok(Some(next))
            });

            match result {
                Ok(outcome) if outcome.changed => {
                    self.metrics.record_pending_expired();
                    warn!(
                        call_id = %session.id,
                        %kind,
                        state = %outcome.session.state,
                        grace_secs = self.config.pending_grace.as_secs(),
                        "Pending action unconfirmed; cleared"
                    );
                    report.expired.push(session.id);
                }
                Ok(_) | Err(SessionError::NotFound(_)) => {}
                Err(err) => {
                    warn!(call_id = %session.id, error = %err, "Sweep could not expire pending action");
                }
            }
        }

        if !report.evicted.is_empty() {
            self.metrics.record_evicted(report.evicted.len() as u64);
        }

        report.evicted_conferences = self
            .store
            .conferences()
            .evict_idle(now, self.config.retention);
        for conference_id in &report.evicted_conferences {
            debug!(%conference_id, "Evicted idle conference");
        }

        report
    }

    /// Sweep every `interval` until cancelled.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_ms = self.config.interval.as_millis() as u64,
                "Reconciliation sweep started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep_once(OffsetDateTime::now_utc());
                        if !report.is_empty() {
                            info!(
                                expired = report.expired.len(),
                                evicted = report.evicted.len(),
                                conferences = report.evicted_conferences.len(),
                                "Reconciliation sweep"
                            );
                        }
                    }
                }
            }
            info!("Reconciliation sweep stopped");
        })
    }
}
