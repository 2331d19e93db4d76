//! Single-flight admission control.

use std::sync::Arc;

use dashmap::DashSet;

/// Requesters with a job currently in flight.
///
/// Gates admission only; it is never used to order work. Checked at
/// submission time, so duplicate submissions made while a job is running
/// are rejected even when the queue has spare slots.
#[derive(Debug, Default)]
pub struct ActivitySet {
    active: DashSet<i64>,
}

impl ActivitySet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a guard when the requester has no job in flight. The entry
    /// is removed when the guard drops, on every resolution path.
    pub fn try_acquire(self: &Arc<Self>, requester_id: i64) -> Option<ActivityGuard> {
        if self.active.insert(requester_id) {
            Some(ActivityGuard {
                set: Arc::clone(self),
                requester_id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, requester_id: i64) -> bool {
        self.active.contains(&requester_id)
    }

    fn release(&self, requester_id: i64) {
        self.active.remove(&requester_id);
    }
}

#[derive(Debug)]
pub struct ActivityGuard {
    set: Arc<ActivitySet>,
    requester_id: i64,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.set.release(self.requester_id);
    }
}
