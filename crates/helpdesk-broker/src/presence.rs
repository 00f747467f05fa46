//! Roster fan-out to responders.

use std::sync::Arc;

use helpdesk_core::{ConnectionId, RosterSnapshot, ServerFrame};
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;
use crate::waiting_line::WaitingLine;

/// Outcome of one fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Responders the snapshot was queued for.
    pub delivered: usize,
    /// Responders whose queue rejected it.
    pub failed: Vec<ConnectionId>,
}

/// Current roster, derived from the waiting line.
pub fn snapshot(waiting: &WaitingLine) -> RosterSnapshot {
    RosterSnapshot {
        queue_length: waiting.len(),
        waiting: waiting.snapshot(),
    }
}

/// Send the current roster to every responder.
///
/// Serializes once. A failed recipient is recorded and skipped so the
/// rest still receive the snapshot.
pub fn notify_all(registry: &ConnectionRegistry, waiting: &WaitingLine) -> FanOut {
    let frame = ServerFrame::roster(snapshot(waiting));
    let json = match frame.to_json() {
        Ok(j) => Arc::new(j),
        Err(e) => {
            warn!(error = %e, "failed to serialize roster");
            return FanOut::default();
        }
    };

    let mut outcome = FanOut::default();
    for id in registry.responders() {
        if registry.send(id, Arc::clone(&json)).is_ok() {
            outcome.delivered += 1;
        } else {
            warn!(conn_id = %id, "failed to send roster to responder");
            outcome.failed.push(id.clone());
        }
    }
    debug!(
        queue_length = waiting.len(),
        recipients = outcome.delivered,
        "roster broadcast"
    );
    outcome
}
