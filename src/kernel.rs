//! The process-wide scheduler context.
//!
//! A [`Kernel`] owns everything the cooperative core needs: the thread
//! arena, the scheduler table with the ready structure and every wait
//! structure, the alarm queue, and the virtual clock. It is constructed
//! once before the first thread and passed around explicitly (as an
//! `Arc`) — there are no globals.
//!
//! # Concurrency model
//!
//! Exactly one simulated thread executes at a time; disabling interrupts is
//! the sole mutual-exclusion mechanism. Every state mutation here happens
//! with interrupts disabled, and the spin lock around [`KernelState`] is
//! released before any context switch — it exists so Rust can prove the
//! sharing sound, the interrupt gate is what makes it exclusive.

use crate::errors::{fault, Fault, SpawnError, ThreadResult};
use crate::machine::Machine;
use crate::sched::{SchedPolicy, SchedTable, SetId, WEIGHT_DEFAULT, WEIGHT_MINIMUM};
use crate::thread::{Target, Tcb, ThreadBuilder, ThreadId, ThreadState};
use crate::time::{AlarmQueue, Tick, TickCounter};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

#[cfg(feature = "host")]
use crate::machine::HostMachine;

pub(crate) struct KernelState<P: SchedPolicy> {
    pub(crate) table: SchedTable<P>,
    pub(crate) threads: Vec<Tcb>,
    /// The ready structure. Non-donating; ordered by the active policy.
    pub(crate) ready: SetId,
    pub(crate) current: ThreadId,
    idle: ThreadId,
    /// A finished thread awaiting teardown by the next dispatched thread.
    to_be_destroyed: Option<ThreadId>,
    alarm: AlarmQueue,
    halted: bool,
}

/// Cooperative single-processor kernel.
///
/// Type parameters pick the environment (`M`) and the scheduling policy
/// (`P`); the donation semantics — maximum for priority, additive for
/// lottery — are fixed per kernel by `P` and cannot be mixed.
///
/// ```
/// use coop_threads::{Kernel, PriorityPolicy};
///
/// let kernel = Kernel::host(PriorityPolicy).unwrap();
/// let k = kernel.clone();
/// let worker = kernel
///     .thread()
///     .name("worker")
///     .spawn(move || k.yield_now())
///     .unwrap();
/// kernel.join(worker);
/// kernel.shutdown();
/// ```
pub struct Kernel<M: Machine, P: SchedPolicy> {
    machine: M,
    clock: TickCounter,
    state: Mutex<KernelState<P>>,
    me: Weak<Self>,
}

impl<M: Machine, P: SchedPolicy> Kernel<M, P> {
    /// Construct the kernel and adopt the calling thread of control as the
    /// main thread.
    ///
    /// The idle thread is created here as well. It never blocks and is
    /// never enqueued on the ready structure; it runs only when nothing
    /// else can, and each pass delivers one timer tick so sleepers make
    /// progress without anyone busy-waiting.
    pub fn start(machine: M, policy: P) -> ThreadResult<Arc<Self>> {
        let kernel = Arc::new_cyclic(|me| {
            let mut table = SchedTable::new(policy);
            let ready = table.new_set(false);

            let main = table.register_thread(WEIGHT_DEFAULT);
            let main_join = table.new_set(true);
            let mut main_tcb = Tcb::new(String::from("main"), main_join);
            main_tcb.status = ThreadState::Running;
            main_tcb.context = Some(machine.adopt_context());
            table.give(main_join, main);

            let idle = table.register_thread(WEIGHT_MINIMUM);
            let idle_join = table.new_set(true);
            let mut idle_tcb = Tcb::new(String::from("idle"), idle_join);
            idle_tcb.status = ThreadState::Ready;
            table.give(idle_join, idle);

            let mut threads = Vec::new();
            threads.push(main_tcb);
            threads.push(idle_tcb);

            Self {
                machine,
                clock: TickCounter::new(),
                state: Mutex::new(KernelState {
                    table,
                    threads,
                    ready,
                    current: main,
                    idle,
                    to_be_destroyed: None,
                    alarm: AlarmQueue::new(),
                    halted: false,
                }),
                me: me.clone(),
            }
        });

        // The idle context can only be created once the kernel exists: its
        // entry needs a handle back to us.
        let weak = Arc::downgrade(&kernel);
        let context = kernel
            .machine
            .create_context(alloc::boxed::Box::new(move || Self::idle_main(weak)))?;
        {
            let mut st = kernel.state.lock();
            let idle = st.idle;
            st.threads[idle.index()].context = Some(context);
        }

        log::debug!("kernel started");
        Ok(kernel)
    }

    /// Begin building a new thread.
    pub fn thread(self: &Arc<Self>) -> ThreadBuilder<M, P> {
        ThreadBuilder::new(self.clone())
    }

    /// The current tick count of the virtual clock.
    pub fn ticks(&self) -> Tick {
        self.clock.now()
    }

    /// The identity of the currently running thread.
    pub fn current(&self) -> ThreadId {
        self.state.lock().current
    }

    /// The debug name of a thread.
    pub fn name_of(&self, thread: ThreadId) -> String {
        self.state.lock().threads[thread.index()].name.clone()
    }

    /// Set the debug name of a thread.
    pub fn set_name<T: Into<String>>(&self, thread: ThreadId, name: T) {
        self.state.lock().threads[thread.index()].name = name.into();
    }

    /// The lifecycle state of a thread.
    pub fn state_of(&self, thread: ThreadId) -> ThreadState {
        self.state.lock().threads[thread.index()].status
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Allocate a new thread in the `New` state.
    pub(crate) fn create_thread(&self, name: String, weight: u64, target: Target) -> ThreadId {
        let was = self.machine.disable_interrupts();
        let thread = {
            let mut st = self.state.lock();
            let thread = st.table.register_thread(weight);
            let join_set = st.table.new_set(true);
            let mut tcb = Tcb::new(name, join_set);
            tcb.target = Some(target);
            st.threads.push(tcb);
            debug_assert_eq!(st.threads.len(), thread.index() + 1);
            // The thread owns its join set until it finishes, so joiners
            // donate to it.
            st.table.give(join_set, thread);
            thread
        };
        self.machine.restore_interrupts(was);
        thread
    }

    /// Begin execution of a previously created thread: `New` becomes
    /// `Ready` and the thread is enqueued on the ready structure.
    ///
    /// Forking a thread twice, or one with no target, is a fatal misuse.
    /// An environment failure to create the execution context is the one
    /// recoverable error.
    pub fn fork(self: &Arc<Self>, thread: ThreadId) -> ThreadResult<()> {
        let was = self.machine.disable_interrupts();

        let target = {
            let mut st = self.state.lock();
            if st.halted {
                drop(st);
                self.machine.restore_interrupts(was);
                return Err(SpawnError::Halted.into());
            }
            let tcb = &mut st.threads[thread.index()];
            if tcb.status != ThreadState::New {
                fault(Fault::DoubleFork);
            }
            match tcb.target.take() {
                Some(target) => target,
                None => fault(Fault::MissingTarget),
            }
        };

        log::debug!("forking thread {} ({})", thread, self.name_of(thread));

        let weak = self.me.clone();
        let entry = alloc::boxed::Box::new(move || {
            if let Some(kernel) = weak.upgrade() {
                kernel.run_thread(thread, target);
            }
        });
        let context = match self.machine.create_context(entry) {
            Ok(context) => context,
            Err(e) => {
                self.machine.restore_interrupts(was);
                return Err(e.into());
            }
        };

        let mut st = self.state.lock();
        st.threads[thread.index()].context = Some(context);
        self.ready_locked(&mut st, thread);
        drop(st);

        self.machine.restore_interrupts(was);
        Ok(())
    }

    /// Entry point of every forked thread.
    fn run_thread(&self, thread: ThreadId, target: Target) {
        // First dispatch lands here with interrupts disabled.
        self.finish_switch();
        debug_assert_eq!(self.current(), thread);
        log::trace!("thread {} begins", thread);
        self.machine.restore_interrupts(true);

        target();

        self.finish();
    }

    /// Relinquish the processor if any other thread is ready to run.
    ///
    /// The current thread goes back on the ready structure and the next
    /// thread chosen by the policy is dispatched; with nothing else ready
    /// this is a no-op.
    pub fn yield_now(&self) {
        let was = self.machine.disable_interrupts();
        let st = self.state.lock();
        if st.halted || st.table.is_empty(st.ready) {
            drop(st);
            self.machine.restore_interrupts(was);
            return;
        }
        debug_assert_eq!(st.threads[st.current.index()].status, ThreadState::Running);
        let mut st = st;
        let current = st.current;
        self.ready_locked(&mut st, current);
        self.dispatch(st);
        self.machine.restore_interrupts(was);
    }

    /// Relinquish the processor because the current thread is blocked or
    /// finished.
    ///
    /// Callable only with interrupts disabled, and only after the caller
    /// has arranged for some other thread (or the timer) to eventually
    /// wake it — nothing here will. A thread blocked with no corresponding
    /// wake is parked forever.
    pub fn sleep(&self) {
        if self.machine.interrupts_enabled() {
            fault(Fault::InterruptsEnabled);
        }
        let mut st = self.state.lock();
        let current = st.current;
        if st.threads[current.index()].status != ThreadState::Finished {
            st.threads[current.index()].status = ThreadState::Blocked;
        }
        self.dispatch(st);
    }

    /// Move a `Blocked` or `New` thread to `Ready` and enqueue it.
    ///
    /// Requires interrupts disabled. Readying an already-ready thread is a
    /// fatal misuse; the idle thread is marked ready but never enqueued.
    pub fn ready(&self, thread: ThreadId) {
        if self.machine.interrupts_enabled() {
            fault(Fault::InterruptsEnabled);
        }
        let mut st = self.state.lock();
        self.ready_locked(&mut st, thread);
    }

    /// Finish the current thread: wake all joiners, schedule the thread
    /// for teardown by the next thread to run, and give up the processor
    /// for good.
    ///
    /// Called automatically when a target returns. The finished thread
    /// cannot free its own active execution context, so reclamation is
    /// deferred to the next dispatch.
    pub fn finish(&self) -> ! {
        self.machine.disable_interrupts();
        let mut st = self.state.lock();
        let current = st.current;
        log::debug!("finishing thread {}", current);

        debug_assert!(st.to_be_destroyed.is_none());
        st.to_be_destroyed = Some(current);
        st.threads[current.index()].status = ThreadState::Finished;

        // Signal completion: stop receiving join donations and ready every
        // joiner.
        let join_set = st.threads[current.index()].join_set;
        st.table.drop_ownership(join_set);
        while let Some(joiner) = st.table.select(join_set) {
            self.ready_locked(&mut st, joiner);
        }

        self.dispatch(st);
        unreachable!("finished thread was dispatched again")
    }

    /// Wait for `thread` to finish.
    ///
    /// Returns immediately if it already has. Joining yourself, or joining
    /// the same thread twice, is a fatal misuse. While blocked, the caller
    /// donates to the joinee.
    pub fn join(&self, thread: ThreadId) {
        let was = self.machine.disable_interrupts();
        let mut st = self.state.lock();
        let current = st.current;
        if thread == current {
            fault(Fault::SelfJoin);
        }
        let tcb = &mut st.threads[thread.index()];
        if tcb.joined {
            fault(Fault::DoubleJoin);
        }
        tcb.joined = true;

        if tcb.status == ThreadState::Finished {
            drop(st);
            self.machine.restore_interrupts(was);
            return;
        }

        let join_set = tcb.join_set;
        st.table.enqueue(join_set, current);
        st.threads[current.index()].status = ThreadState::Blocked;
        self.dispatch(st);
        self.machine.restore_interrupts(was);
    }

    // ------------------------------------------------------------------
    // Alarm
    // ------------------------------------------------------------------

    /// Block the current thread for at least `ticks` timer ticks.
    ///
    /// The thread is readied on the first tick where `now >= deadline`,
    /// never earlier. A zero or negative `ticks` wakes on the very next
    /// tick. No busy-waiting: the thread is parked on the alarm queue
    /// until the tick handler readies it.
    pub fn wait_until(&self, ticks: i64) {
        let was = self.machine.disable_interrupts();
        let now = self.clock.now();
        let deadline = if ticks <= 0 {
            now
        } else {
            now.saturating_add(ticks as u64)
        };

        let mut st = self.state.lock();
        let current = st.current;
        log::trace!("thread {} sleeps until tick {}", current, deadline);
        st.alarm.insert(current, deadline);
        st.threads[current.index()].status = ThreadState::Blocked;
        self.dispatch(st);
        self.machine.restore_interrupts(was);
    }

    /// Deliver one timer tick.
    ///
    /// Advances the virtual clock, readies **every** sleeper whose
    /// deadline has elapsed (tick granularity may pass several deadlines
    /// at once), then yields the running thread.
    ///
    /// The environment is responsible for calling this periodically; under
    /// the host machine the idle thread does so whenever nothing else can
    /// run, and tests may drive it directly.
    pub fn timer_tick(&self) {
        let was = self.machine.disable_interrupts();
        {
            let mut st = self.state.lock();
            if st.halted {
                drop(st);
                self.machine.restore_interrupts(was);
                return;
            }
            let now = self.clock.advance();
            while let Some(sleeper) = st.alarm.pop_elapsed(now) {
                log::trace!("tick {} wakes thread {}", now, sleeper);
                self.ready_locked(&mut st, sleeper);
            }
        }
        self.machine.restore_interrupts(was);

        self.yield_now();
    }

    // ------------------------------------------------------------------
    // Priorities and tickets
    // ------------------------------------------------------------------

    /// The base priority of a thread.
    pub fn priority(&self, thread: ThreadId) -> u64 {
        let was = self.machine.disable_interrupts();
        let priority = self.state.lock().table.base(thread);
        self.machine.restore_interrupts(was);
        priority
    }

    /// The effective priority of a thread: its base priority combined with
    /// everything donated to it transitively.
    pub fn effective_priority(&self, thread: ThreadId) -> u64 {
        let was = self.machine.disable_interrupts();
        let effective = self.state.lock().table.effective(thread);
        self.machine.restore_interrupts(was);
        effective
    }

    /// Set the base priority of a thread, repositioning it in whatever
    /// structure it waits in and propagating donations.
    pub fn set_priority(&self, thread: ThreadId, priority: u64) {
        let was = self.machine.disable_interrupts();
        self.state.lock().table.set_base(thread, priority);
        self.machine.restore_interrupts(was);
    }

    /// Raise the current thread's base priority by one.
    ///
    /// # Returns
    ///
    /// `false` if the priority was already at its maximum.
    pub fn increase_priority(&self) -> bool {
        let was = self.machine.disable_interrupts();
        let mut st = self.state.lock();
        let current = st.current;
        let priority = st.table.base(current);
        let changed = priority < u64::MAX;
        if changed {
            st.table.set_base(current, priority + 1);
        }
        drop(st);
        self.machine.restore_interrupts(was);
        changed
    }

    /// Lower the current thread's base priority by one.
    ///
    /// # Returns
    ///
    /// `false` if the priority was already at its minimum.
    pub fn decrease_priority(&self) -> bool {
        let was = self.machine.disable_interrupts();
        let mut st = self.state.lock();
        let current = st.current;
        let priority = st.table.base(current);
        let changed = priority > WEIGHT_MINIMUM;
        if changed {
            st.table.set_base(current, priority - 1);
        }
        drop(st);
        self.machine.restore_interrupts(was);
        changed
    }

    /// The base ticket count of a thread (lottery deployments).
    #[inline]
    pub fn tickets(&self, thread: ThreadId) -> u64 {
        self.priority(thread)
    }

    /// The effective ticket count of a thread (lottery deployments).
    #[inline]
    pub fn effective_tickets(&self, thread: ThreadId) -> u64 {
        self.effective_priority(thread)
    }

    /// Set the base ticket count of a thread (lottery deployments).
    #[inline]
    pub fn set_tickets(&self, thread: ThreadId, tickets: u64) {
        self.set_priority(thread, tickets);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Halt the kernel and reclaim every execution context except the
    /// caller's.
    ///
    /// Call from the main thread once the simulation is over; every other
    /// thread is parked at that point and is torn down where it stands.
    /// After shutdown, `fork` fails and ticks are ignored.
    pub fn shutdown(&self) {
        let was = self.machine.disable_interrupts();
        let contexts = {
            let mut st = self.state.lock();
            if st.halted {
                drop(st);
                self.machine.restore_interrupts(was);
                return;
            }
            st.halted = true;
            let current = st.current;
            st.threads
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| *index != current.index())
                .filter_map(|(_, tcb)| tcb.context.take())
                .collect::<Vec<_>>()
        };
        log::debug!("kernel shutting down, reclaiming {} contexts", contexts.len());
        for context in contexts {
            self.machine.destroy_context(context);
        }
        self.machine.restore_interrupts(was);
    }

    // ------------------------------------------------------------------
    // Internals shared with the sync primitives
    // ------------------------------------------------------------------

    pub(crate) fn machine(&self) -> &M {
        &self.machine
    }

    /// Lock the kernel state for mutation.
    ///
    /// Interrupts must already be disabled: the gate is the real mutual
    /// exclusion, the lock just proves the sharing to the compiler.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, KernelState<P>> {
        if self.machine.interrupts_enabled() {
            fault(Fault::InterruptsEnabled);
        }
        self.state.lock()
    }

    /// Mark `thread` ready and enqueue it, unless it is the idle thread,
    /// which is never enqueued.
    pub(crate) fn ready_locked(&self, st: &mut KernelState<P>, thread: ThreadId) {
        debug_assert!(!self.machine.interrupts_enabled());
        if st.threads[thread.index()].status == ThreadState::Ready {
            fault(Fault::AlreadyReady);
        }
        st.threads[thread.index()].status = ThreadState::Ready;
        if thread != st.idle {
            let ready = st.ready;
            st.table.enqueue(ready, thread);
        }
    }

    /// Select the next thread to run — the idle thread if nothing is
    /// ready — and switch to it. Consumes the state lock so it is never
    /// held across the switch; on resume, finalizes any pending teardown.
    pub(crate) fn dispatch(&self, mut st: MutexGuard<'_, KernelState<P>>) {
        debug_assert!(!self.machine.interrupts_enabled());
        let previous = st.current;
        let ready = st.ready;
        let next = match st.table.select(ready) {
            Some(next) => next,
            None => st.idle,
        };
        st.current = next;
        log::trace!("switching from thread {} to thread {}", previous, next);

        let from = st.threads[previous.index()]
            .context
            .expect("dispatching from a thread with no context");
        let to = st.threads[next.index()]
            .context
            .expect("dispatching to a thread with no context");
        drop(st);

        self.machine.switch_context(from, to);

        // We are `previous`, resumed at some later point.
        self.finish_switch();
    }

    /// Complete a context switch on the receiving side: mark the new
    /// current thread running and reclaim any thread that finished.
    fn finish_switch(&self) {
        let dead = {
            let mut st = self.state.lock();
            let current = st.current;
            st.threads[current.index()].status = ThreadState::Running;
            st.to_be_destroyed
                .take()
                .and_then(|thread| st.threads[thread.index()].context.take())
        };
        if let Some(context) = dead {
            self.machine.destroy_context(context);
        }
    }

    /// Body of the idle thread: deliver ticks whenever nothing else can
    /// run. `timer_tick` yields after readying sleepers, so control leaves
    /// idle the moment anything becomes runnable.
    fn idle_main(kernel: Weak<Self>) {
        loop {
            let Some(kernel) = kernel.upgrade() else {
                return;
            };
            kernel.timer_tick();
        }
    }
}

#[cfg(feature = "host")]
impl<P: SchedPolicy> Kernel<HostMachine, P> {
    /// Construct a kernel on the host machine.
    pub fn host(policy: P) -> ThreadResult<Arc<Self>> {
        Self::start(HostMachine::new(), policy)
    }
}

impl<M: Machine, P: SchedPolicy> Drop for Kernel<M, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
