//! FIFO queue of sessions blocked on admission.

use std::collections::VecDeque;

use tracing::debug;

use crate::session::{SessionState, SyncSession};

/// Ordered, profile-deduplicating queue.
///
/// A profile name appears at most once; a second request for a queued
/// profile is treated as already pending by the orchestrator rather than
/// enqueued twice.
#[derive(Default)]
pub struct SessionQueue {
    sessions: VecDeque<SyncSession>,
}

impl SessionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session, marking it `Queued`. Returns false (dropping
    /// nothing) when the profile is already queued.
    pub fn enqueue(&mut self, mut session: SyncSession) -> bool {
        if self.contains(session.profile_name()) {
            debug!(profile = %session.profile_name(), "profile already queued");
            return false;
        }
        session.state = SessionState::Queued;
        debug!(profile = %session.profile_name(), "session queued");
        self.sessions.push_back(session);
        true
    }

    /// Remove and return the session for `profile_name`, if queued.
    pub fn dequeue_matching(&mut self, profile_name: &str) -> Option<SyncSession> {
        let pos = self
            .sessions
            .iter()
            .position(|s| s.profile_name() == profile_name)?;
        self.sessions.remove(pos)
    }

    pub fn head(&self) -> Option<&SyncSession> {
        self.sessions.front()
    }

    pub fn pop_head(&mut self) -> Option<SyncSession> {
        self.sessions.pop_front()
    }

    pub fn contains(&self, profile_name: &str) -> bool {
        self.sessions.iter().any(|s| s.profile_name() == profile_name)
    }

    /// Remove every queued session (backup/restore preemption).
    pub fn drain_all(&mut self) -> Vec<SyncSession> {
        self.sessions.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncd_profile::SyncProfile;

    fn session(name: &str) -> SyncSession {
        SyncSession::new(SyncProfile::new(name, "caldav"), false)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = SessionQueue::new();
        assert!(queue.enqueue(session("a")));
        assert!(queue.enqueue(session("b")));
        assert!(queue.enqueue(session("c")));

        assert_eq!(queue.pop_head().unwrap().profile_name(), "a");
        assert_eq!(queue.pop_head().unwrap().profile_name(), "b");
        assert_eq!(queue.pop_head().unwrap().profile_name(), "c");
        assert!(queue.pop_head().is_none());
    }

    #[test]
    fn duplicate_profile_is_rejected() {
        let mut queue = SessionQueue::new();
        assert!(queue.enqueue(session("a")));
        assert!(!queue.enqueue(session("a")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dequeue_matching_removes_mid_queue() {
        let mut queue = SessionQueue::new();
        queue.enqueue(session("a"));
        queue.enqueue(session("b"));
        queue.enqueue(session("c"));

        let removed = queue.dequeue_matching("b").unwrap();
        assert_eq!(removed.profile_name(), "b");
        assert_eq!(removed.state, SessionState::Queued);
        assert!(!queue.contains("b"));
        assert_eq!(queue.len(), 2);
        assert!(queue.dequeue_matching("b").is_none());
    }
}
