//! Condition variables.

use crate::errors::{fault, Fault};
use crate::machine::Machine;
use crate::sched::{SchedPolicy, SetId};
use crate::sync::Lock;
use crate::thread::ThreadState;

/// A condition variable paired with a [`Lock`].
///
/// The current thread must hold the paired lock whenever it calls
/// [`sleep`](Condition::sleep), [`wake`](Condition::wake), or
/// [`wake_all`](Condition::wake_all). The wait set is non-donating: a
/// sleeping thread waits for a state change, not for a resource any
/// particular thread holds.
pub struct Condition<M: Machine, P: SchedPolicy> {
    lock: Lock<M, P>,
    set: SetId,
}

impl<M: Machine, P: SchedPolicy> Condition<M, P> {
    /// Create a condition variable on the given lock.
    pub fn new(lock: &Lock<M, P>) -> Self {
        let kernel = lock.kernel();
        let was = kernel.machine().disable_interrupts();
        let set = kernel.lock_state().table.new_set(false);
        kernel.machine().restore_interrupts(was);
        Self {
            lock: lock.clone(),
            set,
        }
    }

    /// Atomically release the paired lock and block until woken, then
    /// reacquire the lock before returning.
    ///
    /// Interrupts stay disabled across the release and the enqueue: a wake
    /// slipping between the two would otherwise be lost and the sleeper
    /// parked forever.
    pub fn sleep(&self) {
        if !self.lock.is_held_by_current() {
            fault(Fault::ConditionLockNotHeld);
        }
        let kernel = self.lock.kernel();
        let was = kernel.machine().disable_interrupts();

        self.lock.release();
        {
            let mut st = kernel.lock_state();
            let current = st.current;
            st.table.enqueue(self.set, current);
            st.threads[current.index()].status = ThreadState::Blocked;
            kernel.dispatch(st);
        }
        kernel.machine().restore_interrupts(was);

        self.lock.acquire();
    }

    /// Wake at most one sleeping thread.
    ///
    /// The woken thread does not run with the lock; it reacquires it inside
    /// its own `sleep` return path.
    pub fn wake(&self) {
        if !self.lock.is_held_by_current() {
            fault(Fault::ConditionLockNotHeld);
        }
        let kernel = self.lock.kernel();
        let was = kernel.machine().disable_interrupts();
        {
            let mut st = kernel.lock_state();
            if let Some(sleeper) = st.table.select(self.set) {
                kernel.ready_locked(&mut st, sleeper);
            }
        }
        kernel.machine().restore_interrupts(was);
    }

    /// Wake every sleeping thread.
    pub fn wake_all(&self) {
        if !self.lock.is_held_by_current() {
            fault(Fault::ConditionLockNotHeld);
        }
        let kernel = self.lock.kernel();
        let was = kernel.machine().disable_interrupts();
        {
            let mut st = kernel.lock_state();
            while let Some(sleeper) = st.table.select(self.set) {
                kernel.ready_locked(&mut st, sleeper);
            }
        }
        kernel.machine().restore_interrupts(was);
    }
}
