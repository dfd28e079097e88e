//! Thread identity, state machine, and control block.

use crate::machine::ContextId;
use crate::sched::SetId;
use alloc::boxed::Box;
use alloc::string::String;

pub mod builder;

pub use builder::ThreadBuilder;

/// Unique identifier of a thread, doubling as its arena index.
///
/// Ids are never reused for the lifetime of a kernel and compare in
/// creation order, which gives a deterministic total order on threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index value.
    pub fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle state of a thread.
///
/// A thread is `New` until forked, `Ready` while on the ready structure,
/// `Running` while dispatched (exactly one thread at a time), `Blocked`
/// while parked in a wait structure or on the alarm, and `Finished` once
/// its target has returned. A finished thread's context is reclaimed by the
/// next thread to be dispatched, never by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// The target a thread runs when first dispatched.
pub(crate) type Target = Box<dyn FnOnce() + Send + 'static>;

/// Thread control block.
///
/// All fields are plain values: every access happens behind the interrupt
/// gate, so there is nothing to synchronize. Scheduling state (weights,
/// donation graph membership) lives in the scheduler table under the same
/// index.
pub(crate) struct Tcb {
    /// Debug name, used in logging only.
    pub(crate) name: String,
    pub(crate) status: ThreadState,
    /// Runnable target; taken by `fork`.
    pub(crate) target: Option<Target>,
    /// Execution context, once one exists. `None` before `fork` and after
    /// teardown.
    pub(crate) context: Option<ContextId>,
    /// Wait set joiners block on; the thread owns it until it finishes, so
    /// joiners donate to it.
    pub(crate) join_set: SetId,
    /// Whether `join` was already called on this thread.
    pub(crate) joined: bool,
}

impl Tcb {
    pub(crate) fn new(name: String, join_set: SetId) -> Self {
        Self {
            name,
            status: ThreadState::New,
            target: None,
            context: None,
            join_set,
            joined: false,
        }
    }
}
