//! Thread construction.

use super::ThreadId;
use crate::errors::ThreadResult;
use crate::kernel::Kernel;
use crate::machine::Machine;
use crate::sched::{SchedPolicy, WEIGHT_DEFAULT};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

/// Builder for a new thread on a kernel.
///
/// Obtained from [`Kernel::thread`]. The weight is the thread's priority
/// under the priority policy and its ticket count under the lottery
/// policy; both default to the minimum.
pub struct ThreadBuilder<M: Machine, P: SchedPolicy> {
    kernel: Arc<Kernel<M, P>>,
    name: Option<String>,
    weight: u64,
}

impl<M: Machine, P: SchedPolicy> ThreadBuilder<M, P> {
    pub(crate) fn new(kernel: Arc<Kernel<M, P>>) -> Self {
        Self {
            kernel,
            name: None,
            weight: WEIGHT_DEFAULT,
        }
    }

    /// Set the debug name of the thread.
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the base priority of the thread.
    pub fn priority(mut self, priority: u64) -> Self {
        self.weight = priority;
        self
    }

    /// Set the base ticket count of the thread (lottery deployments).
    pub fn tickets(self, tickets: u64) -> Self {
        self.priority(tickets)
    }

    /// Allocate the thread in the `New` state without starting it.
    ///
    /// Fork it later with [`Kernel::fork`].
    pub fn create<F>(self, target: F) -> ThreadId
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| String::from("(unnamed)"));
        self.kernel.create_thread(name, self.weight, Box::new(target))
    }

    /// Allocate the thread and immediately fork it.
    pub fn spawn<F>(self, target: F) -> ThreadResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let kernel = self.kernel.clone();
        let thread = self.create(target);
        kernel.fork(thread)?;
        Ok(thread)
    }
}
