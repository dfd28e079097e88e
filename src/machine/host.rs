//! Host-backed machine: simulated concurrency on parked OS threads.
//!
//! Each context is an OS thread parked on a private gate. A context switch
//! opens the target's gate and parks the caller on its own, so exactly one
//! context executes at any instant — the cooperative single-processor model
//! the kernel assumes. There is no preemption; control moves only through
//! [`Machine::switch_context`].
//!
//! Destroying a context unwinds its thread with a private panic payload and
//! joins it, which is how the kernel's deferred teardown reclaims a finished
//! thread's stack without the thread freeing it itself.

use super::{ContextId, Machine};
use crate::errors::SpawnError;
use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;

/// Panic payload used to unwind a context that will never run again.
struct ContextKilled;

struct Gate {
    runnable: bool,
    killed: bool,
}

struct HostContext {
    gate: Mutex<Gate>,
    unpark: Condvar,
    joiner: Mutex<Option<JoinHandle<()>>>,
}

impl HostContext {
    fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                runnable: false,
                killed: false,
            }),
            unpark: Condvar::new(),
            joiner: Mutex::new(None),
        }
    }
}

/// [`Machine`] implementation for ordinary hosts.
///
/// The interrupt gate is a plain flag: with a single simulated processor
/// nothing else can observe it concurrently, it exists so the kernel can
/// assert the interrupts-disabled discipline.
pub struct HostMachine {
    interrupts: AtomicBool,
    contexts: Mutex<Vec<Arc<HostContext>>>,
}

impl HostMachine {
    pub fn new() -> Self {
        Self {
            interrupts: AtomicBool::new(true),
            contexts: Mutex::new(Vec::new()),
        }
    }

    fn context(&self, id: ContextId) -> Arc<HostContext> {
        let contexts = self.contexts.lock().expect("context table poisoned");
        contexts[id].clone()
    }

    fn register(&self, context: Arc<HostContext>) -> ContextId {
        let mut contexts = self.contexts.lock().expect("context table poisoned");
        contexts.push(context);
        contexts.len() - 1
    }

    /// Park the calling thread until its gate opens.
    ///
    /// If the context was killed while parked, unwinds with `ContextKilled`
    /// instead of returning.
    fn park(context: &HostContext) {
        let mut gate = context.gate.lock().expect("context gate poisoned");
        loop {
            if gate.killed {
                drop(gate);
                panic::panic_any(ContextKilled);
            }
            if gate.runnable {
                gate.runnable = false;
                return;
            }
            gate = context.unpark.wait(gate).expect("context gate poisoned");
        }
    }
}

impl Default for HostMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for HostMachine {
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
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<ContextId, SpawnError> {
        let context = Arc::new(HostContext::new());
        let id = self.register(context.clone());

        let handle = std::thread::Builder::new()
            .name(format!("coop-context-{}", id))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    // Contexts start parked; the first dispatch opens the gate.
                    Self::park(&context);
                    entry();
                }));
                if let Err(payload) = outcome {
                    if payload.downcast_ref::<ContextKilled>().is_none() {
                        // A fault on a forked thread halts the whole
                        // simulated kernel, mirroring a kernel assertion
                        // failure on real hardware.
                        log::error!("context {} panicked; halting kernel", id);
                        std::process::abort();
                    }
                }
            })
            .map_err(|_| SpawnError::Context)?;

        *self.context(id).joiner.lock().expect("joiner poisoned") = Some(handle);
        Ok(id)
    }

    fn adopt_context(&self) -> ContextId {
        // The adopted thread is already running; it has no join handle and
        // is never destroyed.
        self.register(Arc::new(HostContext::new()))
    }

    fn switch_context(&self, from: ContextId, to: ContextId) {
        let target = self.context(to);
        {
            let mut gate = target.gate.lock().expect("context gate poisoned");
            gate.runnable = true;
            target.unpark.notify_one();
        }
        // A self-switch sees its own gate already open and returns.
        let own = self.context(from);
        Self::park(&own);
    }

    fn destroy_context(&self, context: ContextId) {
        let context = self.context(context);
        {
            let mut gate = context.gate.lock().expect("context gate poisoned");
            gate.killed = true;
            context.unpark.notify_one();
        }
        let handle = context.joiner.lock().expect("joiner poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
