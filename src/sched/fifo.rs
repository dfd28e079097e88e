//! First-come-first-served policy.

use super::{SchedPolicy, Waiter};

/// Round-robin baseline: waiters run in enqueue order and weights are
/// ignored. Useful when the workload needs no prioritization at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl SchedPolicy for FifoPolicy {
    fn aggregate(&self, base: u64, _donated: &[u64]) -> u64 {
        base
    }

    fn select(&mut self, waiters: &[Waiter]) -> Option<usize> {
        // Waiters are kept in enqueue order; the earliest seq is the head.
        waiters
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.seq)
            .map(|(index, _)| index)
    }
}
