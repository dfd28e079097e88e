//! The scheduler table: wait sets, per-thread state, and donation.
//!
//! Threads and wait structures refer to each other cyclically (a thread
//! knows where it waits, a structure knows who owns it), so both live in
//! one arena and every relation is a non-owning index. Nothing in here
//! blocks or switches; the table is pure bookkeeping driven by the kernel
//! with interrupts disabled.

use super::{SchedPolicy, WEIGHT_MINIMUM};
use crate::errors::{fault, Fault};
use crate::thread::ThreadId;
use alloc::vec::Vec;

/// Identifier of a wait set within a kernel's scheduler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(usize);

/// One blocked thread inside a wait set.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub thread: ThreadId,
    /// Effective weight at last refresh; kept current so selection never
    /// has to chase the donation graph.
    pub effective: u64,
    /// Enqueue sequence number, unique per set. Breaks ties toward the
    /// longest-waiting thread so equal weights cannot starve each other.
    pub seq: u64,
}

/// Per-thread scheduling state.
struct SchedState {
    /// Base priority or ticket count.
    base: u64,
    /// Base combined with everything donated transitively.
    effective: u64,
    /// The wait set this thread currently blocks in, if any. A thread
    /// belongs to at most one set at a time.
    waiting_in: Option<SetId>,
    /// Donation-enabled sets this thread owns outright.
    owned: Vec<SetId>,
}

/// An ordered collection of blocked threads with a pluggable selection
/// policy.
struct WaitSet {
    /// Whether waiters donate their effective weight to the owner.
    donate: bool,
    /// The thread that acquired the guarded resource outright, if any.
    owner: Option<ThreadId>,
    /// Waiters in enqueue order.
    waiters: Vec<Waiter>,
    next_seq: u64,
}

/// Arena of threads' scheduling states and the wait sets they block in,
/// parameterized by the active policy.
pub struct SchedTable<P: SchedPolicy> {
    policy: P,
    states: Vec<SchedState>,
    sets: Vec<WaitSet>,
}

impl<P: SchedPolicy> SchedTable<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            states: Vec::new(),
            sets: Vec::new(),
        }
    }

    /// Register a new thread with the given base weight.
    pub fn register_thread(&mut self, base: u64) -> ThreadId {
        if base < WEIGHT_MINIMUM {
            fault(Fault::WeightOutOfRange);
        }
        self.states.push(SchedState {
            base,
            effective: base,
            waiting_in: None,
            owned: Vec::new(),
        });
        ThreadId::from_index(self.states.len() - 1)
    }

    /// Create a new wait set.
    ///
    /// `donate` decides whether waiters transfer their effective weight to
    /// the set's owner.
    pub fn new_set(&mut self, donate: bool) -> SetId {
        self.sets.push(WaitSet {
            donate,
            owner: None,
            waiters: Vec::new(),
            next_seq: 0,
        });
        SetId(self.sets.len() - 1)
    }

    pub fn base(&self, thread: ThreadId) -> u64 {
        self.states[thread.index()].base
    }

    pub fn effective(&self, thread: ThreadId) -> u64 {
        self.states[thread.index()].effective
    }

    pub fn owner(&self, set: SetId) -> Option<ThreadId> {
        self.sets[set.0].owner
    }

    pub fn is_empty(&self, set: SetId) -> bool {
        self.sets[set.0].waiters.is_empty()
    }

    pub fn len(&self, set: SetId) -> usize {
        self.sets[set.0].waiters.len()
    }

    pub fn waiting_in(&self, thread: ThreadId) -> Option<SetId> {
        self.states[thread.index()].waiting_in
    }

    /// Change a thread's base weight and ripple the consequences through
    /// the donation graph.
    pub fn set_base(&mut self, thread: ThreadId, base: u64) {
        if base < WEIGHT_MINIMUM {
            fault(Fault::WeightOutOfRange);
        }
        self.states[thread.index()].base = base;
        self.refresh(thread);
    }

    /// Block `thread` in `set`.
    ///
    /// The thread must not already be waiting anywhere; if the set donates
    /// and has an owner, the owner's effective weight is recomputed.
    pub fn enqueue(&mut self, set: SetId, thread: ThreadId) {
        debug_assert!(
            self.states[thread.index()].waiting_in.is_none(),
            "thread already waits in another set"
        );
        let effective = self.states[thread.index()].effective;
        let s = &mut self.sets[set.0];
        let seq = s.next_seq;
        s.next_seq += 1;
        s.waiters.push(Waiter {
            thread,
            effective,
            seq,
        });
        self.states[thread.index()].waiting_in = Some(set);

        let s = &self.sets[set.0];
        if s.donate {
            if let Some(owner) = s.owner {
                self.refresh(owner);
            }
        }
    }

    /// Dequeue the next thread according to the policy, or `None` if the
    /// set is empty.
    ///
    /// Does not transfer ownership; callers that hand over a resource pair
    /// this with [`give`](SchedTable::give).
    pub fn select(&mut self, set: SetId) -> Option<ThreadId> {
        let index = self.policy.select(&self.sets[set.0].waiters)?;
        let waiter = self.sets[set.0].waiters.remove(index);
        self.states[waiter.thread.index()].waiting_in = None;

        let s = &self.sets[set.0];
        if s.donate {
            if let Some(owner) = s.owner {
                // The departing waiter stops donating to whoever still owns
                // the set.
                if owner != waiter.thread {
                    self.refresh(owner);
                }
            }
        }
        Some(waiter.thread)
    }

    /// Remove `thread` from whatever set it waits in, if any.
    pub fn cancel_wait(&mut self, thread: ThreadId) {
        let Some(set) = self.states[thread.index()].waiting_in.take() else {
            return;
        };
        self.sets[set.0].waiters.retain(|w| w.thread != thread);
        let s = &self.sets[set.0];
        if s.donate {
            if let Some(owner) = s.owner {
                self.refresh(owner);
            }
        }
    }

    /// Record that `thread` acquired the resource guarded by `set`
    /// outright, registering it as a donation target.
    pub fn give(&mut self, set: SetId, thread: ThreadId) {
        debug_assert!(self.sets[set.0].owner.is_none(), "set already owned");
        self.sets[set.0].owner = Some(thread);
        if self.sets[set.0].donate {
            self.states[thread.index()].owned.push(set);
            self.refresh(thread);
        }
    }

    /// Strip `set` of its owner, reverting any donations the owner was
    /// receiving through it.
    pub fn drop_ownership(&mut self, set: SetId) -> Option<ThreadId> {
        let owner = self.sets[set.0].owner.take()?;
        if self.sets[set.0].donate {
            self.states[owner.index()].owned.retain(|s| *s != set);
            self.refresh(owner);
        }
        Some(owner)
    }

    /// Recompute `thread`'s effective weight and propagate the change up
    /// the ownership chain.
    ///
    /// If the thread is itself waiting somewhere, its waiter record is
    /// repositioned and the owner of that set refreshed in turn. The chain
    /// terminates because the wait graph is acyclic: a thread cannot wait
    /// on a resource it holds.
    fn refresh(&mut self, thread: ThreadId) {
        let mut current = thread;
        loop {
            let donated: Vec<u64> = {
                let state = &self.states[current.index()];
                state
                    .owned
                    .iter()
                    .flat_map(|set| self.sets[set.0].waiters.iter())
                    .map(|w| w.effective)
                    .collect()
            };
            let base = self.states[current.index()].base;
            let effective = self.policy.aggregate(base, &donated);

            let state = &mut self.states[current.index()];
            if state.effective == effective {
                return;
            }
            state.effective = effective;

            let Some(waiting) = state.waiting_in else {
                return;
            };
            let s = &mut self.sets[waiting.0];
            if let Some(w) = s.waiters.iter_mut().find(|w| w.thread == current) {
                w.effective = effective;
            }
            if !s.donate {
                return;
            }
            let Some(owner) = s.owner else {
                return;
            };
            current = owner;
        }
    }
}
