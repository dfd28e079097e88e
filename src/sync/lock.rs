//! Mutual-exclusion lock with priority donation.

use crate::errors::{fault, Fault};
use crate::kernel::Kernel;
use crate::machine::Machine;
use crate::sched::{SchedPolicy, SetId};
use crate::thread::ThreadState;
use alloc::sync::Arc;

/// A binary resource guarded by a donation-enabled wait set.
///
/// `acquire` makes the caller the owner if the lock is free, otherwise it
/// blocks until the releasing owner hands the lock over. While blocked, a
/// waiter donates its effective weight to the holder, so a high-priority
/// waiter cannot be starved behind a low-priority holder.
///
/// Cloning produces another handle to the same lock.
pub struct Lock<M: Machine, P: SchedPolicy> {
    kernel: Arc<Kernel<M, P>>,
    set: SetId,
}

impl<M: Machine, P: SchedPolicy> Lock<M, P> {
    pub fn new(kernel: &Arc<Kernel<M, P>>) -> Self {
        let was = kernel.machine().disable_interrupts();
        let set = kernel.lock_state().table.new_set(true);
        kernel.machine().restore_interrupts(was);
        Self {
            kernel: kernel.clone(),
            set,
        }
    }

    pub(crate) fn kernel(&self) -> &Arc<Kernel<M, P>> {
        &self.kernel
    }

    /// Acquire the lock, blocking until it is held.
    ///
    /// Re-entrant acquisition by the current holder is a fatal misuse.
    pub fn acquire(&self) {
        let was = self.kernel.machine().disable_interrupts();
        let mut st = self.kernel.lock_state();
        let current = st.current;

        match st.table.owner(self.set) {
            Some(owner) if owner == current => fault(Fault::ReacquireHeldLock),
            Some(_) => {
                // Held: wait our turn. Release wakes us as the new owner.
                st.table.enqueue(self.set, current);
                st.threads[current.index()].status = ThreadState::Blocked;
                self.kernel.dispatch(st);
            }
            None => {
                st.table.give(self.set, current);
                drop(st);
            }
        }
        self.kernel.machine().restore_interrupts(was);
    }

    /// Release the lock, waking the next waiter as the new owner.
    ///
    /// Only the current holder may release; anything else is a fatal
    /// misuse.
    pub fn release(&self) {
        let was = self.kernel.machine().disable_interrupts();
        let mut st = self.kernel.lock_state();
        let current = st.current;

        if st.table.owner(self.set) != Some(current) {
            fault(Fault::ReleaseByNonHolder);
        }
        st.table.drop_ownership(self.set);
        if let Some(next) = st.table.select(self.set) {
            // Ownership transfers before the waiter even runs, so donation
            // to the new holder starts immediately.
            st.table.give(self.set, next);
            self.kernel.ready_locked(&mut st, next);
        }
        drop(st);
        self.kernel.machine().restore_interrupts(was);
    }

    /// Whether the current thread holds this lock.
    pub fn is_held_by_current(&self) -> bool {
        let was = self.kernel.machine().disable_interrupts();
        let st = self.kernel.lock_state();
        let held = st.table.owner(self.set) == Some(st.current);
        drop(st);
        self.kernel.machine().restore_interrupts(was);
        held
    }
}

impl<M: Machine, P: SchedPolicy> Clone for Lock<M, P> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            set: self.set,
        }
    }
}
