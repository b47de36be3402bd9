//! Realtime fanout of session changes to WebSocket subscribers.
//!
//! The store announces changes on a broadcast channel. A single pump task
//! copies each change into the bounded queue of every interested subscriber.
//! Queues drop their oldest entry when full, so a slow client loses updates
//! instead of slowing the pump, and the pump never slows a store write.
//!
//! Delivery is at most once with no replay; a client that reconnects
//! reconciles with `get`/`list`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::metrics::GatewayMetrics;
use crate::core::session::SessionChange;

/// Default per-subscriber queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub type ConnectionId = u64;

/// Which changes a subscriber wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interest {
    pub global: bool,
    pub sessions: HashSet<String>,
}

impl Interest {
    pub fn matches(&self, session_id: &str) -> bool {
        self.global || self.sessions.contains(session_id)
    }

    pub fn is_empty(&self) -> bool {
        !self.global && self.sessions.is_empty()
    }

    pub fn apply(&mut self, update: &InterestUpdate) {
        match update {
            InterestUpdate::SubscribeAll => self.global = true,
            InterestUpdate::Subscribe(id) => {
                self.sessions.insert(id.clone());
            }
            InterestUpdate::UnsubscribeAll => {
                self.global = false;
                self.sessions.clear();
            }
            InterestUpdate::Unsubscribe(id) => {
                self.sessions.remove(id);
            }
        }
    }
}

/// Change to a subscriber's interest requested over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterestUpdate {
    SubscribeAll,
    Subscribe(String),
    UnsubscribeAll,
    Unsubscribe(String),
}

/// Bounded single-consumer queue that drops its oldest entry on overflow.
#[derive(Debug)]
pub struct SubscriberQueue {
    items: Mutex<VecDeque<SessionChange>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without blocking. Returns true if an older entry was dropped.
    pub fn push(&self, change: SessionChange) -> bool {
        let overflowed = {
            let mut items = self.items.lock();
            let overflowed = items.len() >= self.capacity;
            if overflowed {
                items.pop_front();
            }
            items.push_back(change);
            overflowed
        };
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        overflowed
    }

    pub fn try_pop(&self) -> Option<SessionChange> {
        self.items.lock().pop_front()
    }

    /// Wait for the next change. Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<SessionChange> {
        loop {
            if let Some(change) = self.try_pop() {
                return Some(change);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Entries discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Subscriber {
    interest: Interest,
    queue: Arc<SubscriberQueue>,
}

/// Subscriber table keyed by connection id.
pub struct RealtimeFanout {
    subscribers: DashMap<ConnectionId, Subscriber>,
    next_id: AtomicU64,
    queue_capacity: usize,
    metrics: Arc<GatewayMetrics>,
}

impl RealtimeFanout {
    pub fn new(queue_capacity: usize, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity,
            metrics,
        }
    }

    /// Add a connection with no interest yet.
    pub fn register(&self) -> (ConnectionId, Arc<SubscriberQueue>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        self.subscribers.insert(
            id,
            Subscriber {
                interest: Interest::default(),
                queue: queue.clone(),
            },
        );
        debug!(connection_id = id, "Fanout subscriber registered");
        (id, queue)
    }

    pub fn unregister(&self, id: ConnectionId) {
        if let Some((_, subscriber)) = self.subscribers.remove(&id) {
            subscriber.queue.close();
            debug!(
                connection_id = id,
                dropped = subscriber.queue.dropped(),
                "Fanout subscriber removed"
            );
        }
    }

    /// Apply an interest change; returns the resulting interest.
    pub fn update_interest(&self, id: ConnectionId, update: &InterestUpdate) -> Option<Interest> {
        self.subscribers.get_mut(&id).map(|mut subscriber| {
            subscriber.interest.apply(update);
            subscriber.interest.clone()
        })
    }

    pub fn interest(&self, id: ConnectionId) -> Option<Interest> {
        self.subscribers.get(&id).map(|s| s.interest.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Push one change to every matching subscriber. Never blocks on a consumer.
    pub fn publish(&self, change: &SessionChange) -> (u64, u64) {
        let session_id = change.session_id();
        let mut delivered = 0;
        let mut dropped = 0;

        for mut entry in self.subscribers.iter_mut() {
            if !entry.interest.matches(session_id) {
                continue;
            }
            if entry.queue.push(change.clone()) {
                dropped += 1;
            }
            delivered += 1;
            if matches!(change, SessionChange::Removed(_)) {
                entry.interest.sessions.remove(session_id);
            }
        }

        self.metrics.record_fanout(delivered, dropped);
        (delivered, dropped)
    }

    /// Start the task that drains store notifications into subscriber queues.
    pub fn spawn_pump(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<SessionChange>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Realtime fanout started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => {
                            self.publish(&change);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Fanout lagged behind store notifications");
                            self.metrics.record_fanout(0, missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            info!("Realtime fanout stopped");
        })
    }
}
