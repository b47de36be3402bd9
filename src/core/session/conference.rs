//! Conference membership table.
//!
//! Conferences are low-volume compared to call sessions, so a single mutex
//! guards the conference map together with the participant index. That keeps
//! "a participant is in at most one conference" a local invariant of one
//! critical section.
//!
//! Empty conferences are dropped by [`ConferenceRegistry::evict_idle`] once
//! they have seen no change for the retention window.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::debug;

use super::types::ConferenceSession;
use crate::core::error::{SessionError, SessionResult};

#[derive(Default)]
struct ConferenceTable {
    conferences: HashMap<String, ConferenceSession>,
    /// participant id -> conference id
    membership: HashMap<String, String>,
}

/// Registry of conference sessions owned by the session store.
#[derive(Default)]
pub struct ConferenceRegistry {
    table: Mutex<ConferenceTable>,
}

impl ConferenceRegistry {
    pub fn create(&self, name: Option<String>, now: OffsetDateTime) -> ConferenceSession {
        let conference = ConferenceSession::new(name, now);
        self.table
            .lock()
            .conferences
            .insert(conference.id.clone(), conference.clone());
        debug!(conference_id = %conference.id, "Conference created");
        conference
    }

    pub fn get(&self, id: &str) -> SessionResult<ConferenceSession> {
        self.table
            .lock()
            .conferences
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// All conferences, oldest first.
    pub fn list(&self) -> Vec<ConferenceSession> {
        let mut conferences: Vec<_> = self.table.lock().conferences.values().cloned().collect();
        conferences.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        conferences
    }

    /// Conference the participant currently belongs to, if any.
    pub fn conference_of(&self, participant: &str) -> Option<String> {
        self.table.lock().membership.get(participant).cloned()
    }

    /// Check that `participant` may join `conference_id` without changing anything.
    pub fn check_join(&self, conference_id: &str, participant: &str) -> SessionResult<()> {
        let table = self.table.lock();
        Self::check_join_locked(&table, conference_id, participant)
    }

    fn check_join_locked(
        table: &ConferenceTable,
        conference_id: &str,
        participant: &str,
    ) -> SessionResult<()> {
        if !table.conferences.contains_key(conference_id) {
            return Err(SessionError::NotFound(conference_id.to_string()));
        }
        match table.membership.get(participant) {
            Some(current) if current != conference_id => Err(SessionError::ParticipantBusy {
                participant: participant.to_string(),
                conference: current.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Add a participant. Joining the conference it is already in is a no-op.
    pub fn join(
        &self,
        conference_id: &str,
        participant: &str,
        now: OffsetDateTime,
    ) -> SessionResult<ConferenceSession> {
        let mut table = self.table.lock();
        Self::check_join_locked(&table, conference_id, participant)?;

        table
            .membership
            .insert(participant.to_string(), conference_id.to_string());
        let conference = table
            .conferences
            .get_mut(conference_id)
            .ok_or_else(|| SessionError::NotFound(conference_id.to_string()))?;
        if !conference.contains(participant) {
            conference.participants.push(participant.to_string());
            conference.muted.insert(participant.to_string(), false);
            conference.updated_at = now;
        }
        Ok(conference.clone())
    }

    /// Check that `participant` is a member of `conference_id`.
    pub fn check_member(&self, conference_id: &str, participant: &str) -> SessionResult<()> {
        let table = self.table.lock();
        let conference = table
            .conferences
            .get(conference_id)
            .ok_or_else(|| SessionError::NotFound(conference_id.to_string()))?;
        if conference.contains(participant) {
            Ok(())
        } else {
            Err(SessionError::NotFound(participant.to_string()))
        }
    }

    pub fn leave(
        &self,
        conference_id: &str,
        participant: &str,
        now: OffsetDateTime,
    ) -> SessionResult<ConferenceSession> {
        let mut table = self.table.lock();
        let conference = table
            .conferences
            .get_mut(conference_id)
            .ok_or_else(|| SessionError::NotFound(conference_id.to_string()))?;
        if !conference.contains(participant) {
            return Err(SessionError::NotFound(participant.to_string()));
        }
        conference.participants.retain(|p| p != participant);
        conference.muted.remove(participant);
        conference.updated_at = now;
        let snapshot = conference.clone();
        table.membership.remove(participant);
        Ok(snapshot)
    }

    pub fn set_muted(
        &self,
        conference_id: &str,
        participant: &str,
        muted: bool,
        now: OffsetDateTime,
    ) -> SessionResult<ConferenceSession> {
        let mut table = self.table.lock();
        let conference = table
            .conferences
            .get_mut(conference_id)
            .ok_or_else(|| SessionError::NotFound(conference_id.to_string()))?;
        if !conference.contains(participant) {
            return Err(SessionError::NotFound(participant.to_string()));
        }
        conference.muted.insert(participant.to_string(), muted);
        conference.updated_at = now;
        Ok(conference.clone())
    }

    /// Drop a participant from whichever conference holds it.
    pub fn remove_participant(&self, participant: &str, now: OffsetDateTime) {
        let mut table = self.table.lock();
        if let Some(conference_id) = table.membership.remove(participant)
            && let Some(conference) = table.conferences.get_mut(&conference_id)
        {
            conference.participants.retain(|p| p != participant);
            conference.muted.remove(participant);
            conference.updated_at = now;
        }
    }

    /// Remove conferences that are empty and unchanged for longer than `idle`.
    pub fn evict_idle(&self, now: OffsetDateTime, idle: Duration) -> Vec<String> {
        let mut table = self.table.lock();
        let mut evicted = Vec::new();
        table.conferences.retain(|id, conference| {
            let keep = !conference.participants.is_empty() || now - conference.updated_at <= idle;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        evicted.sort();
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(name: &str) -> (ConferenceRegistry, String) {
        let registry = ConferenceRegistry::default();
        let conference = registry.create(Some(name.to_string()), OffsetDateTime::UNIX_EPOCH);
        (registry, conference.id)
    }

    #[test]
    fn test_join_and_leave() {
        let (registry, id) = registry_with("standup");
        let joined = registry.join(&id, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        assert_eq!(joined.participants, vec!["call-a"]);
        assert_eq!(joined.muted.get("call-a"), Some(&false));
        assert_eq!(registry.conference_of("call-a"), Some(id.clone()));

        let left = registry.leave(&id, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(left.participants.is_empty());
        assert!(registry.conference_of("call-a").is_none());
    }

    #[test]
    fn test_list_is_oldest_first() {
        let registry = ConferenceRegistry::default();
        let later = registry.create(
            Some("later".to_string()),
            OffsetDateTime::UNIX_EPOCH + Duration::from_secs(5),
        );
        let earlier = registry.create(Some("earlier".to_string()), OffsetDateTime::UNIX_EPOCH);
        let ids: Vec<_> = registry.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id]);
    }

    #[test]
    fn test_participant_in_at_most_one_conference() {
        let (registry, first) = registry_with("first");
        let second = registry
            .create(Some("second".to_string()), OffsetDateTime::UNIX_EPOCH)
            .id;

        registry.join(&first, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        // Rejoining the same conference is fine
        registry.join(&first, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        assert_eq!(registry.get(&first).unwrap().participants.len(), 1);

        match registry.join(&second, "call-a", OffsetDateTime::UNIX_EPOCH) {
            Err(SessionError::ParticipantBusy { conference, .. }) => assert_eq!(conference, first),
            other => panic!("expected ParticipantBusy, got {other:?}"),
        }
    }

    #[test]
    fn test_mute_requires_membership() {
        let (registry, id) = registry_with("room");
        assert!(matches!(
            registry.set_muted(&id, "ghost", true, OffsetDateTime::UNIX_EPOCH),
            Err(SessionError::NotFound(_))
        ));

        registry.join(&id, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        let muted = registry.set_muted(&id, "call-a", true, OffsetDateTime::UNIX_EPOCH).unwrap();
        assert_eq!(muted.muted.get("call-a"), Some(&true));
    }

    #[test]
    fn test_remove_participant_everywhere() {
        let (registry, id) = registry_with("room");
        registry.join(&id, "call-a", OffsetDateTime::UNIX_EPOCH).unwrap();
        registry.remove_participant("call-a", OffsetDateTime::UNIX_EPOCH);
        assert!(registry.get(&id).unwrap().participants.is_empty());
        assert!(registry.check_join(&id, "call-a").is_ok());
    }

    #[test]
    fn test_unknown_conference() {
        let registry = ConferenceRegistry::default();
        assert!(matches!(
            registry.join("missing", "call-a", OffsetDateTime::UNIX_EPOCH),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_evict_idle_only_drops_empty_stale_conferences() {
        let ts = |secs| OffsetDateTime::from_unix_timestamp(secs).unwrap();
        let registry = ConferenceRegistry::default();
        let busy = registry.create(Some("busy".to_string()), ts(0)).id;
        let quiet = registry.create(Some("quiet".to_string()), ts(0)).id;
        let recent = registry.create(Some("recent".to_string()), ts(0)).id;

        registry.join(&busy, "call-a", ts(10)).unwrap();
        registry.join(&recent, "call-b", ts(10)).unwrap();
        registry.leave(&recent, "call-b", ts(90)).unwrap();

        let idle = Duration::from_secs(60);
        assert!(registry.evict_idle(ts(60), idle).is_empty());

        assert_eq!(registry.evict_idle(ts(100), idle), vec![quiet.clone()]);
        assert!(matches!(registry.get(&quiet), Err(SessionError::NotFound(_))));
        assert!(registry.get(&busy).is_ok());
        assert!(registry.get(&recent).is_ok());

        assert_eq!(registry.evict_idle(ts(200), idle), vec![recent]);
        assert_eq!(registry.list().len(), 1);
    }
}
