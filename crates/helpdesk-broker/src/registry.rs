//! Live connections and their outbound queues.
//!
//! The registry holds the only [`Outbound`] sender for each connection.
//! Dropping an entry therefore closes that connection's writer once the
//! frames already queued have been flushed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use helpdesk_core::{BrokerError, ConnectionId, Role, ServerFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

/// Send half of a connection's writer queue.
pub type Outbound = mpsc::Sender<Arc<String>>;

struct Entry {
    role: Role,
    tx: Outbound,
    connected_at: Instant,
}

/// Connections keyed by their generated ID.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection and return its fresh ID.
    pub fn register(&mut self, tx: Outbound, role: Role) -> ConnectionId {
        let mut id = ConnectionId::generate();
        while self.entries.contains_key(&id) {
            id = ConnectionId::generate();
        }
        let _ = self.entries.insert(
            id.clone(),
            Entry {
                role,
                tx,
                connected_at: Instant::now(),
            },
        );
        debug!(conn_id = %id, %role, "connection registered");
        id
    }

    /// Forget a connection. Returns its role, or `None` if it was not tracked.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Role> {
        let entry = self.entries.remove(id)?;
        debug!(
            conn_id = %id,
            role = %entry.role,
            age_ms = u64::try_from(entry.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "connection unregistered"
        );
        Some(entry.role)
    }

    /// Queue a serialized frame for `id` without waiting.
    ///
    /// A missing entry or a full queue fails with
    /// [`BrokerError::DeliveryFailed`]. A writer that has already exited
    /// means the socket is gone and fails with
    /// [`BrokerError::TransportClosed`].
    pub fn send(&self, id: &ConnectionId, payload: Arc<String>) -> Result<(), BrokerError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| BrokerError::DeliveryFailed(id.clone()))?;
        entry.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => BrokerError::DeliveryFailed(id.clone()),
            TrySendError::Closed(_) => BrokerError::TransportClosed,
        })
    }

    /// Serialize and queue a frame for `id`.
    pub fn send_frame(&self, id: &ConnectionId, frame: &ServerFrame) -> Result<(), BrokerError> {
        match frame.to_json() {
            Ok(json) => self.send(id, Arc::new(json)),
            Err(e) => {
                error!(conn_id = %id, error = %e, "failed to serialize frame");
                Ok(())
            }
        }
    }

    /// Role of a tracked connection.
    pub fn role_of(&self, id: &ConnectionId) -> Option<Role> {
        self.entries.get(id).map(|e| e.role)
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// IDs of every connected responder.
    pub(crate) fn responders(&self) -> impl Iterator<Item = &ConnectionId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.role == Role::Responder)
            .map(|(id, _)| id)
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connection is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tracked connections with `role`.
    pub fn count_by_role(&self, role: Role) -> usize {
        self.entries.values().filter(|e| e.role == role).count()
    }
}
