//! Test helper utilities.

use crate::kernel::Kernel;
use crate::machine::HostMachine;
use crate::sched::SchedPolicy;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::Mutex;

/// Run `test` against a fresh host kernel, shutting it down afterwards so
/// no parked contexts outlive the test.
pub(crate) fn with_kernel<P, F>(policy: P, test: F)
where
    P: SchedPolicy,
    F: FnOnce(&Arc<Kernel<HostMachine, P>>),
{
    let kernel = Kernel::host(policy).expect("failed to start kernel");
    test(&kernel);
    kernel.shutdown();
}

/// A shared, ordered record of what ran when.
///
/// Threads push marks as they execute; the test asserts on the final
/// sequence. Pushes never happen across a blocking call, so the inner
/// mutex is uncontended.
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<i64>>>,
}

impl EventLog {
    pub(crate) fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, event: i64) {
        self.events.lock().expect("event log poisoned").push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<i64> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}
