//! First-come-first-served line of requesters awaiting a responder.

use std::collections::{HashSet, VecDeque};

use helpdesk_core::ConnectionId;

/// Ordered, duplicate-free queue of requester IDs.
#[derive(Debug, Default)]
pub struct WaitingLine {
    order: VecDeque<ConnectionId>,
    members: HashSet<ConnectionId>,
}

impl WaitingLine {
    /// Create an empty line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` at the back. Returns `false` if it was already queued.
    pub fn enqueue(&mut self, id: ConnectionId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Remove and return the earliest arrival.
    pub fn dequeue_front(&mut self) -> Option<ConnectionId> {
        let id = self.order.pop_front()?;
        let _ = self.members.remove(&id);
        Some(id)
    }

    /// Put `id` back at the head, e.g. after a claim could not complete.
    pub(crate) fn restore_front(&mut self, id: ConnectionId) {
        if self.members.insert(id.clone()) {
            self.order.push_front(id);
        }
    }

    /// Remove `id` wherever it sits. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    /// Current order, earliest first.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.order.iter().cloned().collect()
    }

    /// 1-based position of `id`, if queued.
    pub fn position(&self, id: &ConnectionId) -> Option<usize> {
        if !self.members.contains(id) {
            return None;
        }
        self.order.iter().position(|queued| queued == id).map(|i| i + 1)
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    /// Number of queued requesters.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
