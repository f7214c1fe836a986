//! Count of free build slots.

use tracing::warn;

/// Tracks how many more builds may be dispatched.
///
/// Starts at `capacity`, goes down by one per dispatch and up by one per
/// observed completion. Owned by the scheduler thread only, so it is a plain
/// counter rather than an atomic.
#[derive(Debug, Clone)]
pub struct BuilderBudget {
    capacity: usize,
    free: usize,
}

impl BuilderBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: capacity,
        }
    }

    /// Take a slot. Returns `false` when none are free.
    pub fn try_acquire(&mut self) -> bool {
        if self.free == 0 {
            return false;
        }
        self.free -= 1;
        true
    }

    /// Return a slot. A release with every slot already free is ignored so the
    /// count never exceeds `capacity`.
    pub fn release(&mut self) -> bool {
        if self.free >= self.capacity {
            warn!(
                capacity = self.capacity,
                "build slot released with no build in flight"
            );
            return false;
        }
        self.free += 1;
        true
    }

    pub fn free(&self) -> usize {
        self.free
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.free
    }

    pub fn is_exhausted(&self) -> bool {
        self.free == 0
    }
}
