//! Gateway counters
//!
//! Plain atomic counters bumped from the webhook path, the dispatcher, the
//! sweeper and the fanout. Read through [`GatewayMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters for webhook ingestion, commands, reconciliation and fanout.
#[derive(Debug)]
pub struct GatewayMetrics {
    webhooks_received: AtomicU64,
    events_applied: AtomicU64,
    events_stale: AtomicU64,
    events_after_terminal: AtomicU64,
    invalid_transitions: AtomicU64,
    malformed_payloads: AtomicU64,
    signature_failures: AtomicU64,
    cas_conflicts: AtomicU64,

    commands_issued: AtomicU64,
    commands_rejected: AtomicU64,
    provider_errors: AtomicU64,
    provider_timeouts: AtomicU64,
    /// Total provider round-trip time (microseconds)
    provider_time_us: AtomicU64,

    pending_expired: AtomicU64,
    sessions_evicted: AtomicU64,

    fanout_delivered: AtomicU64,
    fanout_dropped: AtomicU64,

    start_time: Instant,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub webhooks_received: u64,
    pub events_applied: u64,
    pub events_stale: u64,
    pub events_after_terminal: u64,
    pub invalid_transitions: u64,
    pub malformed_payloads: u64,
    pub signature_failures: u64,
    pub cas_conflicts: u64,
    pub commands_issued: u64,
    pub commands_rejected: u64,
    pub provider_errors: u64,
    pub provider_timeouts: u64,
    pub provider_avg_latency_us: u64,
    pub pending_expired: u64,
    pub sessions_evicted: u64,
    pub fanout_delivered: u64,
    pub fanout_dropped: u64,
    pub uptime_secs: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            webhooks_received: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            events_stale: AtomicU64::new(0),
            events_after_terminal: AtomicU64::new(0),
            invalid_transitions: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            cas_conflicts: AtomicU64::new(0),
            commands_issued: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            provider_errors: AtomicU64::new(0),
            provider_timeouts: AtomicU64::new(0),
            provider_time_us: AtomicU64::new(0),
            pending_expired: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            fanout_delivered: AtomicU64::new(0),
            fanout_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_webhook(&self) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.events_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_after_terminal(&self) {
        self.events_after_terminal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_transition(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signature_failure(&self) {
        self.signature_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Command accepted locally and sent to the provider
    pub fn record_command(&self) {
        self.commands_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Command refused before reaching the provider
    pub fn record_rejected_command(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self, elapsed: Duration, outcome: ProviderOutcome) {
        self.provider_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        match outcome {
            ProviderOutcome::Ok => {}
            ProviderOutcome::Error => {
                self.provider_errors.fetch_add(1, Ordering::Relaxed);
            }
            ProviderOutcome::Timeout => {
                self.provider_timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_pending_expired(&self) {
        self.pending_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fanout(&self, delivered: u64, dropped: u64) {
        self.fanout_delivered.fetch_add(delivered, Ordering::Relaxed);
        self.fanout_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let commands = self.commands_issued.load(Ordering::Relaxed);
        let provider_time_us = self.provider_time_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            webhooks_received: self.webhooks_received.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_stale: self.events_stale.load(Ordering::Relaxed),
            events_after_terminal: self.events_after_terminal.load(Ordering::Relaxed),
            invalid_transitions: self.invalid_transitions.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            commands_issued: commands,
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            provider_timeouts: self.provider_timeouts.load(Ordering::Relaxed),
            provider_avg_latency_us: if commands > 0 {
                provider_time_us / commands
            } else {
                0
            },
            pending_expired: self.pending_expired.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            fanout_delivered: self.fanout_delivered.load(Ordering::Relaxed),
            fanout_dropped: self.fanout_dropped.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// How a provider round trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Ok,
    Error,
    Timeout,
}
