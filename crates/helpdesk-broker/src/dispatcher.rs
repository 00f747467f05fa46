//! The broker state machine.
//!
//! [`Dispatcher`] owns the connection registry, the waiting line and the
//! session table, and applies connect, frame and disconnect events to them
//! one at a time. It is not `Sync` on purpose: the [`service`](crate::service)
//! task is its only owner, which is what makes `dequeue_front` followed by
//! `bind` atomic with respect to every other claim.
//!
//! Frames that cannot be queued for their target never fail the event that
//! produced them. The target is recorded as an eviction and run through the
//! ordinary disconnect cascade once the current event has finished.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use helpdesk_core::{
    BrokerError, ClientFrame, ConnectionId, EndReason, Role, RosterSnapshot, ServerFrame,
    SessionStatus,
};
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::metrics::{
    CLAIMS_TOTAL, CONNECTIONS_TOTAL, DELIVERY_FAILURES_TOTAL, REJECTIONS_TOTAL, RELAYS_TOTAL,
    SESSIONS_ACTIVE, SESSIONS_ENDED_TOTAL, WAITING,
};
use crate::presence;
use crate::registry::{ConnectionRegistry, Outbound};
use crate::session_table::SessionTable;
use crate::waiting_line::WaitingLine;

/// Point-in-time counts for health reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Live connections of either role.
    pub connections: usize,
    /// Live requester connections.
    pub requesters: usize,
    /// Live responder connections.
    pub responders: usize,
    /// Requesters in the waiting line.
    pub waiting: usize,
    /// Bound requester/responder pairs.
    pub active_sessions: usize,
}

/// Owner of all broker state.
pub struct Dispatcher {
    registry: ConnectionRegistry,
    waiting: WaitingLine,
    sessions: SessionTable,
    idle_timeout: Option<Duration>,
    evictions: VecDeque<ConnectionId>,
}

impl Dispatcher {
    /// Create an empty dispatcher. `idle_timeout` enables [`Self::sweep_idle`].
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            waiting: WaitingLine::new(),
            sessions: SessionTable::new(),
            idle_timeout,
            evictions: VecDeque::new(),
        }
    }

    // ── events ───────────────────────────────────────────────────────────

    /// A connection finished its upgrade.
    ///
    /// Requesters join the back of the waiting line. Every responder,
    /// including a new one, receives the resulting roster.
    pub fn connect(&mut self, role: Role, tx: Outbound) -> ConnectionId {
        let id = self.registry.register(tx, role);
        counter!(CONNECTIONS_TOTAL, "role" => role.as_str()).increment(1);
        info!(conn_id = %id, %role, "connection accepted");

        let _ = self.deliver(&id, &ServerFrame::welcome(id.clone(), role));
        if role == Role::Requester {
            let _ = self.waiting.enqueue(id.clone());
            let status = self.status_of(&id);
            let _ = self.deliver(&id, &ServerFrame::session(status));
        }
        self.broadcast_presence();
        self.drain_evictions();
        id
    }

    /// A text frame arrived from `id`.
    ///
    /// Frames from unknown IDs are dropped; they can only be stragglers from
    /// a connection that has already been cleaned up.
    pub fn handle_text(&mut self, id: &ConnectionId, text: &str) {
        if !self.registry.contains(id) {
            debug!(conn_id = %id, "frame from unregistered connection dropped");
            return;
        }
        let result = ClientFrame::parse(text).and_then(|frame| self.handle_frame(id, frame));
        if let Err(err) = result {
            self.report(id, &err);
        }
        self.drain_evictions();
    }

    /// A frame from `id` arrived but could not be read as text.
    ///
    /// The sender is told `INVALID_FRAME` and stays connected.
    pub fn reject_frame(&mut self, id: &ConnectionId, reason: &str) {
        if !self.registry.contains(id) {
            debug!(conn_id = %id, "undecodable frame from unregistered connection dropped");
            return;
        }
        self.report(id, &BrokerError::InvalidFrame(reason.to_owned()));
        self.drain_evictions();
    }

    /// Apply one parsed frame from `id`.
    pub fn handle_frame(&mut self, id: &ConnectionId, frame: ClientFrame) -> Result<(), BrokerError> {
        debug!(conn_id = %id, kind = frame.kind(), "frame");
        match frame {
            ClientFrame::Claim => self.claim(id).map(|_| ()),
            ClientFrame::Message { to, content } => self.relay(id, to.as_ref(), content).map(|_| ()),
            ClientFrame::Status => self.send_status(id),
            ClientFrame::End => self.end_session(id, EndReason::Ended),
        }
    }

    /// The transport for `id` closed. Safe to call more than once.
    pub fn disconnect(&mut self, id: &ConnectionId) {
        self.cascade(id);
        self.drain_evictions();
    }

    /// End every session quiet for longer than the idle timeout.
    ///
    /// Returns the number of sessions ended. Without a configured timeout
    /// this does nothing.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub(timeout) else {
            return 0;
        };
        let mut ended = 0;
        for requester in self.sessions.idle_since(cutoff) {
            if self.end_session(&requester, EndReason::IdleTimeout).is_ok() {
                ended += 1;
            }
        }
        if ended > 0 {
            info!(ended, "idle sessions ended");
        }
        self.drain_evictions();
        ended
    }

    // ── operations ───────────────────────────────────────────────────────

    /// Bind responder `responder` to the head of the waiting line.
    pub fn claim(&mut self, responder: &ConnectionId) -> Result<ConnectionId, BrokerError> {
        let role = self.role(responder)?;
        if role != Role::Responder {
            return Err(BrokerError::RoleNotPermitted {
                role,
                action: "claim",
            });
        }
        if self.sessions.is_bound(responder) {
            return Err(BrokerError::AlreadyBound(responder.clone()));
        }

        let requester = self
            .waiting
            .dequeue_front()
            .ok_or(BrokerError::NothingWaiting)?;
        if let Err(err) = self
            .sessions
            .bind(requester.clone(), responder.clone(), Instant::now())
        {
            self.waiting.restore_front(requester);
            return Err(err);
        }

        counter!(CLAIMS_TOTAL).increment(1);
        info!(requester = %requester, responder = %responder, "session started");

        let _ = self.deliver(
            &requester,
            &ServerFrame::session(SessionStatus::bound(responder.clone())),
        );
        let _ = self.deliver(
            responder,
            &ServerFrame::session(SessionStatus::bound(requester.clone())),
        );
        self.broadcast_presence();
        Ok(requester)
    }

    /// Relay `content` from `sender` to its counterpart, unmodified.
    ///
    /// When `to` is given it must name the counterpart.
    pub fn relay(
        &mut self,
        sender: &ConnectionId,
        to: Option<&ConnectionId>,
        content: Box<RawValue>,
    ) -> Result<ConnectionId, BrokerError> {
        let Some(counterpart) = self.sessions.counterpart_of(sender).cloned() else {
            return Err(if self.waiting.contains(sender) {
                BrokerError::NoCounterpartYet
            } else {
                BrokerError::NotBound
            });
        };
        if let Some(target) = to {
            if *target != counterpart {
                return Err(BrokerError::WrongTarget(target.clone()));
            }
        }

        self.sessions.touch(sender, Instant::now());
        if !self.deliver(&counterpart, &ServerFrame::relay(sender.clone(), content)) {
            return Err(BrokerError::DeliveryFailed(counterpart));
        }
        counter!(RELAYS_TOTAL).increment(1);
        Ok(counterpart)
    }

    /// Dissolve the session containing `id`.
    ///
    /// Both parties are told why. The responder returns to idle; the
    /// requester's connection is closed.
    pub fn end_session(&mut self, id: &ConnectionId, reason: EndReason) -> Result<(), BrokerError> {
        let counterpart = self
            .sessions
            .unbind_by_either(id)
            .ok_or(BrokerError::NotBound)?;

        counter!(SESSIONS_ENDED_TOTAL, "reason" => reason.as_str()).increment(1);
        info!(conn_id = %id, counterpart = %counterpart, reason = reason.as_str(), "session ended");

        let _ = self.deliver(
            id,
            &ServerFrame::session(SessionStatus::ended(counterpart.clone(), reason)),
        );
        let _ = self.deliver(
            &counterpart,
            &ServerFrame::session(SessionStatus::ended(id.clone(), reason)),
        );

        let requester = if self.registry.role_of(id) == Some(Role::Requester) {
            id
        } else {
            &counterpart
        };
        let _ = self.registry.unregister(requester);

        self.broadcast_presence();
        Ok(())
    }

    /// Send `id` its own status. Responders also get the roster.
    pub fn send_status(&mut self, id: &ConnectionId) -> Result<(), BrokerError> {
        let role = self.role(id)?;
        let status = self.status_of(id);
        let _ = self.deliver(id, &ServerFrame::session(status));
        if role == Role::Responder {
            let _ = self.deliver(id, &ServerFrame::roster(self.roster()));
        }
        Ok(())
    }

    // ── queries ──────────────────────────────────────────────────────────

    /// Current roster.
    pub fn roster(&self) -> RosterSnapshot {
        presence::snapshot(&self.waiting)
    }

    /// Session counterpart of `id`.
    pub fn counterpart_of(&self, id: &ConnectionId) -> Option<&ConnectionId> {
        self.sessions.counterpart_of(id)
    }

    /// Whether `id` is a live connection.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Current counts.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            connections: self.registry.len(),
            requesters: self.registry.count_by_role(Role::Requester),
            responders: self.registry.count_by_role(Role::Responder),
            waiting: self.waiting.len(),
            active_sessions: self.sessions.len(),
        }
    }

    fn status_of(&self, id: &ConnectionId) -> SessionStatus {
        match self.sessions.counterpart_of(id) {
            Some(counterpart) => SessionStatus::bound(counterpart.clone()),
            None => SessionStatus {
                connected: false,
                position: self.waiting.position(id),
                ..SessionStatus::default()
            },
        }
    }

    fn role(&self, id: &ConnectionId) -> Result<Role, BrokerError> {
        self.registry.role_of(id).ok_or(BrokerError::NotBound)
    }

    // ── internals ────────────────────────────────────────────────────────

    /// Remove `id` from every structure and notify whoever is affected.
    fn cascade(&mut self, id: &ConnectionId) {
        let Some(role) = self.registry.unregister(id) else {
            return;
        };
        let was_waiting = self.waiting.remove(id);

        if let Some(counterpart) = self.sessions.unbind_by_either(id) {
            let reason = EndReason::CounterpartDisconnected;
            counter!(SESSIONS_ENDED_TOTAL, "reason" => reason.as_str()).increment(1);
            info!(conn_id = %id, counterpart = %counterpart, "session ended by disconnect");
            let _ = self.deliver(
                &counterpart,
                &ServerFrame::session(SessionStatus::ended(id.clone(), reason)),
            );
            if self.registry.role_of(&counterpart) == Some(Role::Requester) {
                let _ = self.registry.unregister(&counterpart);
            }
        }

        info!(conn_id = %id, %role, was_waiting, "connection closed");
        self.broadcast_presence();
    }

    /// Queue `frame` for `id`. On failure `id` is scheduled for eviction.
    fn deliver(&mut self, id: &ConnectionId, frame: &ServerFrame) -> bool {
        match self.registry.send_frame(id, frame) {
            Ok(()) => true,
            Err(BrokerError::TransportClosed) => {
                debug!(conn_id = %id, "writer already gone, evicting");
                self.schedule_eviction(id);
                false
            }
            Err(err) => {
                counter!(DELIVERY_FAILURES_TOTAL).increment(1);
                warn!(conn_id = %id, error = %err, "delivery failed, evicting");
                self.schedule_eviction(id);
                false
            }
        }
    }

    fn report(&mut self, id: &ConnectionId, err: &BrokerError) {
        if !err.is_reportable() {
            debug!(conn_id = %id, error = %err, "unreported error");
            return;
        }
        counter!(REJECTIONS_TOTAL, "code" => err.code().as_str()).increment(1);
        debug!(conn_id = %id, code = %err.code(), "frame rejected");
        let _ = self.deliver(id, &ServerFrame::rejected(err));
    }

    fn broadcast_presence(&mut self) {
        let outcome = presence::notify_all(&self.registry, &self.waiting);
        for id in &outcome.failed {
            counter!(DELIVERY_FAILURES_TOTAL).increment(1);
            self.schedule_eviction(id);
        }
        #[allow(clippy::cast_precision_loss)]
        {
            gauge!(WAITING).set(self.waiting.len() as f64);
            gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        }
    }

    fn schedule_eviction(&mut self, id: &ConnectionId) {
        if self.registry.contains(id) && !self.evictions.contains(id) {
            self.evictions.push_back(id.clone());
        }
    }

    /// Run the disconnect cascade for every scheduled eviction. Cascades
    /// may schedule more; the loop drains those too.
    fn drain_evictions(&mut self) {
        while let Some(id) = self.evictions.pop_front() {
            self.cascade(&id);
        }
    }
}
