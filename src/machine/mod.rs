//! Machine abstraction: the interrupt gate and the context-switch primitive.
//!
//! The core consumes three things from its environment: an interrupt
//! disable/restore primitive with explicit boolean save/restore, an opaque
//! context-switch primitive, and a periodic tick notification (delivered by
//! calling [`Kernel::timer_tick`](crate::kernel::Kernel::timer_tick)). This
//! module defines the trait bundling the first two and a no-op stub; the
//! [`host`] module provides the implementation used on a normal host.

use crate::errors::SpawnError;
use alloc::boxed::Box;
use portable_atomic::{AtomicBool, Ordering};

/// Identifier of an execution context held by the machine.
pub type ContextId = usize;

/// Environment interface consumed by the kernel.
///
/// Interrupt state is a single flag saved and restored explicitly as a
/// boolean — nesting is the caller's responsibility, this is not a counting
/// mutex. Contexts are opaque: the kernel only ever creates them, switches
/// between them, and destroys them.
pub trait Machine: Send + Sync + 'static {
    /// Disable interrupt delivery.
    ///
    /// # Returns
    ///
    /// `true` if interrupts were enabled before the call. Pass the value
    /// back to [`restore_interrupts`](Machine::restore_interrupts) to undo.
    fn disable_interrupts(&self) -> bool;

    /// Restore interrupt delivery to a previously saved state.
    fn restore_interrupts(&self, was_enabled: bool);

    /// Check whether interrupts are currently enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Create a new execution context that will run `entry` when first
    /// switched to.
    ///
    /// The context must not start running before the first
    /// [`switch_context`](Machine::switch_context) targeting it.
    fn create_context(
        &self,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<ContextId, SpawnError>;

    /// Bind the calling thread of control as a context.
    ///
    /// Used once at kernel startup to turn the caller into the main thread.
    fn adopt_context(&self) -> ContextId;

    /// Suspend `from` and resume `to`.
    ///
    /// Returns when `from` is next switched to. Must be called with
    /// interrupts disabled; switching a context to itself is permitted and
    /// returns immediately.
    fn switch_context(&self, from: ContextId, to: ContextId);

    /// Reclaim a context that will never run again.
    ///
    /// Called by the *next* thread to be dispatched after the owner
    /// finished — a context cannot reclaim itself while still executing.
    fn destroy_context(&self, context: ContextId);
}

/// A no-op machine for unit tests and as a placeholder on targets where the
/// environment is provided elsewhere.
///
/// Contexts are handed out but never actually run, so this stub is only
/// suitable for exercising code that does not switch.
pub struct NoOpMachine {
    interrupts: AtomicBool,
    contexts: portable_atomic::AtomicUsize,
}

impl NoOpMachine {
    pub const fn new() -> Self {
        Self {
            interrupts: AtomicBool::new(true),
            contexts: portable_atomic::AtomicUsize::new(0),
        }
    }
}

impl Default for NoOpMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for NoOpMachine {
    fn disable_interrupts(&self) -> bool {
        self.interrupts.swap(false, Ordering::AcqRel)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        self.interrupts.store(was_enabled, Ordering::Release);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::Acquire)
    }

    fn create_context(
        &self,
        _entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<ContextId, SpawnError> {
        Ok(self.contexts.fetch_add(1, Ordering::AcqRel))
    }

    fn adopt_context(&self) -> ContextId {
        self.contexts.fetch_add(1, Ordering::AcqRel)
    }

    fn switch_context(&self, _from: ContextId, _to: ContextId) {}

    fn destroy_context(&self, _context: ContextId) {}
}

#[cfg(feature = "host")]
pub mod host;

#[cfg(feature = "host")]
pub use host::HostMachine;
