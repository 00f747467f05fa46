//! Heartbeat liveness for one WebSocket connection.
//!
//! Times come from the tokio clock so paused-time tests can drive timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Shared between a connection's reader (which marks activity) and its
/// writer (which sends pings and checks for silence).
#[derive(Debug)]
pub struct Liveness {
    /// Whether anything arrived since the last check.
    is_alive: AtomicBool,
    /// When the last Pong (or any frame) was received.
    last_seen: Mutex<Instant>,
}

impl Liveness {
    /// Start out alive.
    pub fn new() -> Self {
        Self {
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the peer was heard from since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the peer was last heard from.
    pub fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Whether the peer has been silent for longer than `timeout`.
    ///
    /// Only consults the clock when the alive flag was already clear.
    pub fn timed_out(&self, timeout: Duration) -> bool {
        !self.check_alive() && self.silent_for() > timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_alive() {
        let l = Liveness::new();
        assert!(l.check_alive());
        assert!(!l.check_alive());
    }

    #[test]
    fn mark_alive_resets_flag() {
        let l = Liveness::new();
        let _ = l.check_alive();
        l.mark_alive();
        assert!(l.check_alive());
    }

    #[test]
    fn recent_activity_is_not_a_timeout() {
        let l = Liveness::new();
        let _ = l.check_alive();
        assert!(!l.timed_out(Duration::from_secs(60)));
    }

    #[test]
    fn silence_past_timeout_is_detected() {
        let l = Liveness::new();
        let _ = l.check_alive();
        *l.last_seen.lock() = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap();
        assert!(l.silent_for() >= Duration::from_secs(120));
        assert!(l.timed_out(Duration::from_secs(90)));
    }

    #[test]
    fn alive_flag_defers_timeout() {
        let l = Liveness::new();
        *l.last_seen.lock() = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap();
        // Flag still set from construction
        assert!(!l.timed_out(Duration::from_secs(90)));
    }
}
