//! Error handling for the cooperative threading core.
//!
//! Two kinds of failure exist here. Genuine environment failures (the host
//! refusing to create a context) are recoverable and surface through
//! [`ThreadResult`]. Misuse of the primitives — releasing a lock you do not
//! hold, joining yourself, forking a thread twice — is a [`Fault`]: the
//! simulated kernel halts, it never limps on.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Error type for recoverable threading operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread creation errors
    Spawn(SpawnError),
}

/// Errors that can occur while creating a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The machine could not allocate an execution context
    Context,
    /// The kernel has been shut down
    Halted,
}

/// A fatal misuse of the threading primitives.
///
/// Faults correspond to the precondition violations of the core: none of
/// them is recoverable, and raising one halts the simulated kernel. They
/// exist as a type so the halt message names the violation precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `fork` called on a thread that was already forked
    DoubleFork,
    /// `fork` called on a thread with no target to run
    MissingTarget,
    /// A thread tried to join itself
    SelfJoin,
    /// `join` called twice on the same thread
    DoubleJoin,
    /// The current holder tried to re-acquire a lock
    ReacquireHeldLock,
    /// `release` called by a thread that does not hold the lock
    ReleaseByNonHolder,
    /// A condition variable was used without holding its paired lock
    ConditionLockNotHeld,
    /// Scheduler state was touched with interrupts enabled
    InterruptsEnabled,
    /// `ready` called on a thread that is already ready
    AlreadyReady,
    /// A ticket sum exceeded the accumulator width
    TicketOverflow,
    /// A priority or ticket count below the minimum
    WeightOutOfRange,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "thread spawn error: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Context => write!(f, "machine could not create an execution context"),
            SpawnError::Halted => write!(f, "kernel has been shut down"),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DoubleFork => write!(f, "thread forked twice"),
            Fault::MissingTarget => write!(f, "thread forked without a target"),
            Fault::SelfJoin => write!(f, "thread joined itself"),
            Fault::DoubleJoin => write!(f, "thread joined twice"),
            Fault::ReacquireHeldLock => write!(f, "lock re-acquired by its holder"),
            Fault::ReleaseByNonHolder => write!(f, "lock released by a non-holder"),
            Fault::ConditionLockNotHeld => {
                write!(f, "condition variable used without holding its lock")
            }
            Fault::InterruptsEnabled => {
                write!(f, "scheduler state accessed with interrupts enabled")
            }
            Fault::AlreadyReady => write!(f, "ready called on an already-ready thread"),
            Fault::TicketOverflow => write!(f, "ticket sum overflowed"),
            Fault::WeightOutOfRange => write!(f, "priority or ticket count out of range"),
        }
    }
}

impl From<SpawnError> for ThreadError {
    fn from(error: SpawnError) -> Self {
        ThreadError::Spawn(error)
    }
}

/// Halt the simulated kernel on a precondition violation.
///
/// This never returns; on the host machine a fault raised by a forked
/// thread aborts the process, while a fault on the adopted main context
/// propagates as an ordinary panic.
pub(crate) fn fault(fault: Fault) -> ! {
    panic!("kernel fault: {}", fault)
}
