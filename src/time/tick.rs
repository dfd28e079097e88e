//! Tick counting.

use super::Tick;
use portable_atomic::{AtomicU64, Ordering};

/// Monotonic tick counter for the simulated kernel.
///
/// Incremented once per timer tick and read by the alarm to decide which
/// sleepers have reached their deadline. This is the only time source the
/// core consumes.
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advance the clock by one tick.
    ///
    /// Called once per timer tick delivery.
    ///
    /// # Returns
    ///
    /// The new tick count.
    pub fn advance(&self) -> Tick {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Get the current tick count.
    pub fn now(&self) -> Tick {
        self.ticks.load(Ordering::Acquire)
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}
