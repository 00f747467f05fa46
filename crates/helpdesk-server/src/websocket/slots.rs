//! Connection limit accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Count of open WebSocket connections, bounded by a maximum.
#[derive(Debug, Default)]
pub struct ConnectionSlots {
    active: AtomicUsize,
}

impl ConnectionSlots {
    /// No slots taken.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot if fewer than `max` are in use.
    pub fn try_acquire(self: &Arc<Self>, max: usize) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(SlotGuard {
            slots: Arc::clone(self),
        })
    }

    /// Slots currently in use.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Holds one slot; releases it on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<ConnectionSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.slots.active.fetch_sub(1, Ordering::AcqRel);
    }
}
