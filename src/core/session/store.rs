//! In-memory call session store with compare-and-swap writes.
//!
//! Sessions live in a sharded [`DashMap`]; no lock is held across sessions or
//! while a mutator runs. Each record carries a `revision` that is checked and
//! bumped on write, so concurrent writers to the same session race and exactly
//! one wins while the others observe [`SessionError::Conflict`].
//!
//! Every successful write is announced on a broadcast channel consumed by the
//! realtime fanout. Sending never blocks: a lagging receiver loses the oldest
//! notifications.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::conference::ConferenceRegistry;
use super::types::{CallSession, SessionFilter, SessionSnapshot};
use crate::core::error::{SessionError, SessionResult};

/// Default number of retries `upsert_with_retry` performs after a conflict
pub const DEFAULT_MAX_CAS_RETRIES: usize = 3;

/// Default capacity of the change notification channel
pub const DEFAULT_NOTIFY_CAPACITY: usize = 1024;

/// State-change notification emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Session was created or updated
    Updated(SessionSnapshot),
    /// Session was deleted or evicted
    Removed(SessionSnapshot),
}

impl SessionChange {
    pub fn snapshot(&self) -> &SessionSnapshot {
        match self {
            SessionChange::Updated(s) | SessionChange::Removed(s) => s,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.snapshot().id
    }
}

/// Outcome of an `upsert`.
#[derive(Debug, Clone)]
pub struct Upserted {
    /// The session as stored after the call
    pub session: CallSession,
    /// False when the mutator declined to write
    pub changed: bool,
}

/// Owner of all call and conference session records.
pub struct SessionStore {
    sessions: DashMap<String, CallSession>,
    conferences: ConferenceRegistry,
    changes: broadcast::Sender<SessionChange>,
    max_retries: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAS_RETRIES, DEFAULT_NOTIFY_CAPACITY)
    }
}

impl SessionStore {
    pub fn new(max_retries: usize, notify_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(notify_capacity.max(1));
        Self {
            sessions: DashMap::new(),
            conferences: ConferenceRegistry::default(),
            changes,
            max_retries,
        }
    }

    /// Receive every change notification emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    pub fn conferences(&self) -> &ConferenceRegistry {
        &self.conferences
    }

    pub fn get(&self, id: &str) -> SessionResult<CallSession> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions matching `filter`, oldest first.
    pub fn list(&self, filter: &SessionFilter) -> Vec<CallSession> {
        let mut sessions: Vec<CallSession> = self
            .sessions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Write `record` only if the stored revision still equals `expected`.
    ///
    /// `expected = None` means "create": succeeds only while the slot is vacant.
    /// If a record that existed at read time has since been evicted the write
    /// fails with `NotFound`.
    pub fn compare_and_swap(
        &self,
        expected: Option<u64>,
        mut record: CallSession,
    ) -> SessionResult<CallSession> {
        let id = record.id.clone();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut occupied) => match expected {
                Some(revision) if occupied.get().revision == revision => {
                    record.revision = revision + 1;
                    occupied.insert(record.clone());
                }
                _ => {
                    debug!(call_id = %id, "CAS conflict: record changed since read");
                    return Err(SessionError::Conflict(id));
                }
            },
            Entry::Vacant(vacant) => match expected {
                None => {
                    record.revision = 1;
                    vacant.insert(record.clone());
                }
                Some(_) => return Err(SessionError::NotFound(id)),
            },
        }

        // Shard guard is released before notifying
        let _ = self.changes.send(SessionChange::Updated(record.snapshot()));
        Ok(record)
    }

    /// Atomic read-modify-write of one session.
    ///
    /// The mutator receives the current record (or `None`) and returns the
    /// record to store, or `None` to leave things as they are. Returning `None`
    /// for a missing session yields `NotFound`.
    pub fn upsert<F>(&self, id: &str, mutator: F) -> SessionResult<Upserted>
    where
        F: FnOnce(Option<&CallSession>) -> SessionResult<Option<CallSession>>,
    {
        let current = self.sessions.get(id).map(|entry| entry.value().clone());
        let expected = current.as_ref().map(|s| s.revision);

        match mutator(current.as_ref())? {
            Some(mut next) => {
                next.id = id.to_string();
                let session = self.compare_and_swap(expected, next)?;
                Ok(Upserted {
                    session,
                    changed: true,
                })
            }
            None => match current {
                Some(session) => Ok(Upserted {
                    session,
                    changed: false,
                }),
                None => Err(SessionError::NotFound(id.to_string())),
            },
        }
    }

    /// `upsert` with a bounded number of retries on `Conflict`.
    pub fn upsert_with_retry<F>(&self, id: &str, mut mutator: F) -> SessionResult<Upserted>
    where
        F: FnMut(Option<&CallSession>) -> SessionResult<Option<CallSession>>,
    {
        let mut attempt = 0;
        loop {
            match self.upsert(id, &mut mutator) {
                Err(SessionError::Conflict(_)) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(call_id = %id, attempt, "Retrying upsert after conflict");
                }
                Err(SessionError::Conflict(conflict_id)) => {
                    warn!(
                        call_id = %id,
                        retries = self.max_retries,
                        "Giving up after repeated CAS conflicts"
                    );
                    return Err(SessionError::Conflict(conflict_id));
                }
                other => return other,
            }
        }
    }

    /// Remove a session and detach it from any conference.
    pub fn delete(&self, id: &str) -> Option<CallSession> {
        self.delete_if(id, |_| true)
    }

    /// Remove a session only if `predicate` holds for the stored record.
    ///
    /// The check runs under the shard lock, so a write landing after the
    /// caller's snapshot is seen by the predicate.
    pub fn delete_if<F>(&self, id: &str, predicate: F) -> Option<CallSession>
    where
        F: FnOnce(&CallSession) -> bool,
    {
        let (_, removed) = self.sessions.remove_if(id, |_, session| predicate(session))?;
        self.conferences
            .remove_participant(id, OffsetDateTime::now_utc());
        let _ = self.changes.send(SessionChange::Removed(removed.snapshot()));
        Some(removed)
    }
}
