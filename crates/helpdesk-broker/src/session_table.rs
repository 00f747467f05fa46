//! Active requester/responder bindings.
//!
//! Each ID appears in at most one session, in either role. Sessions are
//! keyed by requester with a reverse index by responder, so lookups from
//! either side are O(1).

use std::collections::HashMap;
use std::time::Instant;

use helpdesk_core::{BrokerError, ConnectionId};

/// One 1:1 binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// The requester being served.
    pub requester: ConnectionId,
    /// The responder serving it.
    pub responder: ConnectionId,
    /// When the binding was made.
    pub started_at: Instant,
    /// Last relayed message in either direction.
    pub last_activity: Instant,
}

impl Session {
    /// The party opposite `id`, if `id` is in this session.
    pub fn counterpart_of(&self, id: &ConnectionId) -> Option<&ConnectionId> {
        if *id == self.requester {
            Some(&self.responder)
        } else if *id == self.responder {
            Some(&self.requester)
        } else {
            None
        }
    }
}

/// Set of active sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    by_requester: HashMap<ConnectionId, Session>,
    by_responder: HashMap<ConnectionId, ConnectionId>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `requester` to `responder`.
    ///
    /// Fails with [`BrokerError::AlreadyBound`] naming the first party that
    /// already participates in a session.
    pub fn bind(
        &mut self,
        requester: ConnectionId,
        responder: ConnectionId,
        now: Instant,
    ) -> Result<(), BrokerError> {
        for id in [&requester, &responder] {
            if self.is_bound(id) {
                return Err(BrokerError::AlreadyBound(id.clone()));
            }
        }
        let _ = self
            .by_responder
            .insert(responder.clone(), requester.clone());
        let _ = self.by_requester.insert(
            requester.clone(),
            Session {
                requester,
                responder,
                started_at: now,
                last_activity: now,
            },
        );
        Ok(())
    }

    /// Remove the session containing `id` in either role and return the
    /// counterpart.
    pub fn unbind_by_either(&mut self, id: &ConnectionId) -> Option<ConnectionId> {
        let requester = if self.by_requester.contains_key(id) {
            id.clone()
        } else {
            self.by_responder.get(id)?.clone()
        };
        let session = self.by_requester.remove(&requester)?;
        let _ = self.by_responder.remove(&session.responder);
        session.counterpart_of(id).cloned()
    }

    /// Counterpart of `id`, if it is in a session.
    pub fn counterpart_of(&self, id: &ConnectionId) -> Option<&ConnectionId> {
        if let Some(session) = self.by_requester.get(id) {
            return Some(&session.responder);
        }
        self.by_responder.get(id)
    }

    /// The session containing `id`, in either role.
    pub fn get(&self, id: &ConnectionId) -> Option<&Session> {
        match self.by_requester.get(id) {
            Some(session) => Some(session),
            None => self
                .by_responder
                .get(id)
                .and_then(|requester| self.by_requester.get(requester)),
        }
    }

    /// Record activity on the session containing `id`.
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) {
        let requester = match self.by_responder.get(id) {
            Some(requester) => requester.clone(),
            None => id.clone(),
        };
        if let Some(session) = self.by_requester.get_mut(&requester) {
            session.last_activity = now;
        }
    }

    /// Requesters whose sessions have been quiet since before `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<ConnectionId> {
        let mut idle: Vec<&Session> = self
            .by_requester
            .values()
            .filter(|s| s.last_activity < cutoff)
            .collect();
        idle.sort_by_key(|s| s.last_activity);
        idle.into_iter().map(|s| s.requester.clone()).collect()
    }

    /// Whether `id` is in any session.
    pub fn is_bound(&self, id: &ConnectionId) -> bool {
        self.by_requester.contains_key(id) || self.by_responder.contains_key(id)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.by_requester.len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.by_requester.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    #[test]
    fn bind_and_lookup_both_ways() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        assert_eq!(table.counterpart_of(&id("r1")), Some(&id("a1")));
        assert_eq!(table.counterpart_of(&id("a1")), Some(&id("r1")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bind_rejects_busy_responder() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        let err = table.bind(id("r2"), id("a1"), Instant::now()).unwrap_err();
        assert_matches!(err, BrokerError::AlreadyBound(busy) if busy == id("a1"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bind_rejects_busy_requester() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        let err = table.bind(id("r1"), id("a2"), Instant::now()).unwrap_err();
        assert_matches!(err, BrokerError::AlreadyBound(busy) if busy == id("r1"));
        assert!(!table.is_bound(&id("a2")));
    }

    #[test]
    fn unbind_from_requester_side() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        assert_eq!(table.unbind_by_either(&id("r1")), Some(id("a1")));
        assert!(table.is_empty());
        assert!(table.counterpart_of(&id("a1")).is_none());
    }

    #[test]
    fn unbind_from_responder_side() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        assert_eq!(table.unbind_by_either(&id("a1")), Some(id("r1")));
        assert!(!table.is_bound(&id("r1")));
        assert!(!table.is_bound(&id("a1")));
    }

    #[test]
    fn unbind_unknown_returns_none() {
        let mut table = SessionTable::new();
        assert!(table.unbind_by_either(&id("ghost")).is_none());
    }

    #[test]
    fn responder_can_rebind_after_unbind() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        let _ = table.unbind_by_either(&id("r1"));
        table.bind(id("r2"), id("a1"), Instant::now()).unwrap();
        assert_eq!(table.counterpart_of(&id("a1")), Some(&id("r2")));
    }

    #[test]
    fn touch_and_idle_since() {
        let start = Instant::now();
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), start).unwrap();
        table.bind(id("r2"), id("a2"), start).unwrap();

        let later = start + Duration::from_secs(60);
        table.touch(&id("a2"), later);

        let idle = table.idle_since(start + Duration::from_secs(30));
        assert_eq!(idle, vec![id("r1")]);
        assert_eq!(table.get(&id("a2")).unwrap().last_activity, later);
    }

    #[test]
    fn get_from_either_side() {
        let mut table = SessionTable::new();
        table.bind(id("r1"), id("a1"), Instant::now()).unwrap();
        let via_responder = table.get(&id("a1")).unwrap();
        assert_eq!(via_responder.requester, id("r1"));
        assert_eq!(table.get(&id("r1")), table.get(&id("a1")));
        assert!(table.get(&id("zz")).is_none());
    }
}
