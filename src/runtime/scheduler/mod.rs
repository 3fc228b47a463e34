//! Cooperative scheduler for legacy tasks.
//!
//! # Model
//!
//! Exactly one legacy frame executes at a time, though many native threads
//! may call in. A single [`parking_lot::Mutex`] guards the descriptor store,
//! the ready list, and the dispatch bookkeeping. It is held for every
//! mutation and released at one place only: around the external blocking
//! wait inside [`Scheduler::reschedule`], so that another native thread can
//! deliver the event that makes a task ready.
//!
//! # Dispatch cycle
//!
//! 1. Delete the pending-kill task if it is no longer current.
//! 2. Choose a candidate: the directed-yield target if it is ready, else
//!    the first ready task in priority order. While a pin is set, any
//!    candidate other than the pinned task is rejected.
//! 3. With no candidate, return [`Dispatch::Deferred`] if a software event is
//!    queued, otherwise wait for an external event with the lock released
//!    and start over.
//! 4. If the candidate is already current, return [`Dispatch::Unchanged`].
//! 5. Otherwise move the candidate to the tail of its band, switch frames
//!    through the bridge, and return [`Dispatch::Switched`].
//!
//! When every started task has terminated the cycle switches back to the
//! native frame and reports [`Dispatch::Drained`].
//!
//! # Deletion
//!
//! Killing a task that is not current frees it immediately. Killing the
//! current task parks it in the pending-kill slot, because its stack is the
//! one in use; it is deleted by the first dispatch cycle that runs after a
//! different frame has been switched in.

pub(crate) mod guard;
pub mod ready;

pub use guard::in_dispatch;
pub use ready::{ReadyIter, ReadyList};

use crate::error::Result;
use crate::record::TaskInfo;
use crate::runtime::bridge::HostBridge;
use crate::runtime::config::SchedulerConfig;
use crate::runtime::state::{SchedulerPhase, SchedulerState};
use crate::runtime::thunk::{Thunk, ThunkTarget};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{clamp_priority, LegacyContext, ModuleRef, Priority, QueueId, TaskHandle};
use guard::DispatchGuard;
use parking_lot::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// Clears the dispatching-thread record if a cycle unwinds while holding it.
struct DispatcherClaim<'a> {
    state: &'a Mutex<SchedulerState>,
    armed: bool,
}

impl Drop for DispatcherClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().dispatcher = None;
        }
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Control moved to `to`; `from` is `None` when the native frame was saved.
    Switched {
        /// Previously current task.
        from: Option<TaskHandle>,
        /// Newly current task.
        to: TaskHandle,
    },
    /// The best candidate was already current.
    Unchanged(TaskHandle),
    /// Nothing was ready and a software event must be handled by the caller.
    Deferred,
    /// Every started task has terminated; the native frame is back.
    Drained,
}

impl Dispatch {
    /// The task running after this cycle, if any.
    #[must_use]
    pub const fn task(&self) -> Option<TaskHandle> {
        match self {
            Self::Switched { to, .. } => Some(*to),
            Self::Unchanged(task) => Some(*task),
            Self::Deferred | Self::Drained => None,
        }
    }
}

/// The cooperative scheduler.
///
/// `B` supplies the external wait, wake, and context-switch primitives.
#[derive(Debug)]
pub struct Scheduler<B: HostBridge> {
    state: Mutex<SchedulerState>,
    bridge: B,
    config: SchedulerConfig,
}

impl<B: HostBridge> Scheduler<B> {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new(bridge: B) -> Self {
        Self::with_config(SchedulerConfig::default(), bridge)
    }

    /// Creates a scheduler from an explicit configuration.
    #[must_use]
    pub fn with_config(mut config: SchedulerConfig, bridge: B) -> Self {
        config.normalize();
        debug!(
            max_tasks = config.max_tasks,
            stack_size = config.stack_size,
            thunks_per_block = config.thunks_per_block,
            max_thunk_blocks = config.max_thunk_blocks,
            fatal_response = ?config.fatal_response,
            "scheduler created"
        );
        Self {
            state: Mutex::new(SchedulerState::new(&config)),
            bridge,
            config,
        }
    }

    /// The normalized configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The host bridge.
    #[must_use]
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Allocates a new task. The task is not runnable until started.
    ///
    /// `priority` is clamped into the legal band.
    pub fn create_task(
        &self,
        module: ModuleRef,
        priority: i32,
        initial_context: LegacyContext,
    ) -> Result<TaskHandle> {
        let priority = clamp_priority(priority);
        let mut state = self.state.lock();
        let handle = state.create(module, priority, initial_context)?;
        debug!(task = ?handle, module = %module, priority, "task created");
        Ok(handle)
    }

    /// Links a created task into the ready list and counts it as live.
    ///
    /// A legacy caller leaves one event pending on the new task; a native
    /// caller wakes the external wait instead. Starting twice is a no-op.
    pub fn start_task(&self, handle: TaskHandle) -> Result<()> {
        let mut state = self.state.lock();
        let legacy = Self::caller_is_legacy(&state);
        let desc = state.live_mut(handle)?;
        if desc.started {
            trace!(task = ?handle, "task already started");
            return Ok(());
        }
        desc.started = true;
        if legacy {
            desc.pending_events = desc.pending_events.saturating_add(1);
        }
        let st = &mut *state;
        st.ready.link(handle, &mut st.tasks);
        st.task_count += 1;
        st.started_any = true;
        if st.phase == SchedulerPhase::Draining {
            st.phase = SchedulerPhase::NoCurrentTask;
        }
        debug!(task = ?handle, legacy, task_count = st.task_count, "task started");
        drop(state);

        if !legacy {
            self.bridge.wake();
        }
        Ok(())
    }

    /// Begins termination of a task.
    ///
    /// The task is unlinked at once and its termination handler runs with
    /// the lock released. A task that is not current is deleted before this
    /// returns; the current task is parked until a later dispatch cycle.
    /// Killing a task that is already terminating does nothing.
    pub fn kill_task(&self, handle: TaskHandle) -> Result<()> {
        let handler = {
            let mut state = self.state.lock();
            let desc = state.descriptor_mut(handle)?;
            if !desc.alive {
                warn!(task = ?handle, "task is already terminating");
                return Ok(());
            }
            desc.alive = false;
            desc.yield_target = None;
            let handler = desc.termination_handler.take();
            let was_started = desc.started;

            let st = &mut *state;
            st.ready.unlink(handle, &mut st.tasks);
            if was_started {
                st.task_count -= 1;
            }
            if st.locked == Some(handle) {
                st.locked = None;
                debug!(task = ?handle, "pin released by termination");
            }
            debug!(task = ?handle, task_count = st.task_count, "task terminating");
            handler
        };

        if let Some(handler) = handler {
            trace!(task = ?handle, "running termination handler");
            handler(handle);
        }

        let mut state = self.state.lock();
        if state.current == Some(handle) {
            if let Some(previous) = state.pending_kill.replace(handle) {
                if previous != handle {
                    state.delete(previous);
                }
            }
            debug!(task = ?handle, "deletion deferred until the frame is switched out");
        } else {
            state.delete(handle);
        }
        Ok(())
    }

    // =====================================================================
    // Events and yielding
    // =====================================================================

    /// Adds one pending event to a task.
    ///
    /// A native caller also wakes the external wait unless the target is the
    /// frame that is executing right now.
    pub fn post_event(&self, handle: TaskHandle) -> Result<()> {
        let mut state = self.state.lock();
        let legacy = Self::caller_is_legacy(&state);
        let running = state.current == Some(handle) && state.phase == SchedulerPhase::RunningLegacy;
        let desc = state.live_mut(handle)?;
        desc.pending_events = desc.pending_events.saturating_add(1);
        trace!(task = ?handle, pending_events = desc.pending_events, legacy, "event posted");
        drop(state);

        if !legacy && !running {
            self.bridge.wake();
        }
        Ok(())
    }

    /// Consumes a pending event, dispatching first if there is none.
    ///
    /// Returns `false` when an event was already pending, `true` when a
    /// dispatch cycle ran. After the cycle one event is consumed if any is
    /// pending by then.
    pub fn wait_event(&self, handle: TaskHandle) -> Result<bool> {
        {
            let mut state = self.state.lock();
            let desc = state.live_mut(handle)?;
            if desc.pending_events > 0 {
                desc.pending_events -= 1;
                trace!(task = ?handle, pending_events = desc.pending_events, "event consumed");
                return Ok(false);
            }
        }

        self.reschedule();

        let mut state = self.state.lock();
        if let Ok(desc) = state.descriptor_mut(handle) {
            if desc.pending_events > 0 {
                desc.pending_events -= 1;
            }
        }
        Ok(true)
    }

    /// Lets other ready tasks run, then resumes.
    ///
    /// The caller's counter is raised so it stays eligible, one dispatch
    /// cycle runs, and the counter is lowered again.
    pub fn yield_now(&self, handle: TaskHandle) -> Result<()> {
        {
            let mut state = self.state.lock();
            let desc = state.live_mut(handle)?;
            desc.pending_events = desc.pending_events.saturating_add(1);
        }

        self.dispatch(Some(handle));

        let mut state = self.state.lock();
        if let Ok(desc) = state.descriptor_mut(handle) {
            desc.pending_events = desc.pending_events.saturating_sub(1);
        }
        Ok(())
    }

    /// Yields, preferring `target` on the next dispatch if it is ready.
    pub fn directed_yield(&self, handle: TaskHandle, target: TaskHandle) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.descriptor(target)?;
            state.live_mut(handle)?.yield_target = Some(target);
            trace!(task = ?handle, target = ?target, "directed yield requested");
        }
        self.yield_now(handle)
    }

    /// Adjusts a task's priority by `delta`, clamped; returns the new value.
    pub fn set_priority(&self, handle: TaskHandle, delta: i32) -> Result<Priority> {
        let mut state = self.state.lock();
        let current = state.live(handle)?.priority;
        let priority = clamp_priority(i32::from(current).saturating_add(delta));
        Self::reprioritize(&mut state, handle, priority)
    }

    /// Sets a task's priority outright, clamped; returns the new value.
    pub fn set_absolute_priority(&self, handle: TaskHandle, priority: i32) -> Result<Priority> {
        let mut state = self.state.lock();
        Self::reprioritize(&mut state, handle, clamp_priority(priority))
    }

    fn reprioritize(
        state: &mut SchedulerState,
        handle: TaskHandle,
        priority: Priority,
    ) -> Result<Priority> {
        let desc = state.live_mut(handle)?;
        desc.priority = priority;
        if desc.linked {
            state.ready.unlink(handle, &mut state.tasks);
            state.ready.link(handle, &mut state.tasks);
        }
        trace!(task = ?handle, priority, "priority changed");
        Ok(priority)
    }

    // =====================================================================
    // Dispatch
    // =====================================================================

    /// Runs one dispatch cycle.
    ///
    /// Blocks in the bridge's external wait while nothing is ready. Entering
    /// this from inside a dispatch on the same thread, or while another
    /// thread is dispatching, is fatal.
    pub fn reschedule(&self) -> Dispatch {
        self.dispatch(None)
    }

    /// One dispatch cycle on behalf of `yielding`, whose yield target is
    /// consumed by the first dispatch decision.
    fn dispatch(&self, mut yielding: Option<TaskHandle>) -> Dispatch {
        let _guard = DispatchGuard::enter(self.config.fatal_response);
        let me = thread::current().id();
        let mut claim = DispatcherClaim {
            state: &self.state,
            armed: false,
        };
        let mut state = self.state.lock();
        if let Some(other) = state.dispatcher {
            drop(state);
            guard::violation(
                self.config.fatal_response,
                &format!("dispatch entered while {other:?} is dispatching"),
            );
        }
        state.dispatcher = Some(me);
        claim.armed = true;
        let outcome = self.dispatch_locked(&mut state, me, &mut yielding);
        state.dispatcher = None;
        claim.armed = false;
        outcome
    }

    fn dispatch_locked(
        &self,
        state: &mut MutexGuard<'_, SchedulerState>,
        me: ThreadId,
        yielding: &mut Option<TaskHandle>,
    ) -> Dispatch {
        loop {
            if state.started_any && state.task_count == 0 {
                return self.drain(state);
            }
            state.phase = SchedulerPhase::Dispatching;

            if let Some(reaped) = state.reap_pending_kill() {
                trace!(task = ?reaped, "pending kill reaped");
            }

            let Some(next) = state.select_candidate(yielding.take()) else {
                if self.bridge.software_event_pending() {
                    state.phase = if state.current.is_some() {
                        SchedulerPhase::RunningLegacy
                    } else {
                        SchedulerPhase::NoCurrentTask
                    };
                    trace!("software event pending, deferring");
                    return Dispatch::Deferred;
                }
                trace!("nothing ready, waiting for external event");
                let woke = MutexGuard::unlocked(state, || self.bridge.wait_for_external_event(true));
                trace!(woke, "external wait returned");
                continue;
            };

            if state.current == Some(next) {
                if let Ok(desc) = state.descriptor_mut(next) {
                    desc.native_owner = Some(me);
                }
                state.phase = SchedulerPhase::RunningLegacy;
                trace!(task = ?next, "current task stays");
                return Dispatch::Unchanged(next);
            }

            return self.switch_to(state, next, me);
        }
    }

    fn switch_to(&self, state: &mut SchedulerState, next: TaskHandle, me: ThreadId) -> Dispatch {
        let from = state.current;
        state.ready.unlink(next, &mut state.tasks);
        state.ready.link(next, &mut state.tasks);

        let Some(incoming) = state.tasks.get(next.arena_index()).map(|d| d.legacy_context) else {
            unreachable!("candidate {next:?} is not resident");
        };
        match from.and_then(|h| state.tasks.get_mut(h.arena_index())) {
            Some(old) => {
                self.bridge.switch_context(&mut old.legacy_context, &incoming);
                old.native_owner = None;
            }
            None => self.bridge.switch_context(&mut state.native_context, &incoming),
        }
        if let Some(desc) = state.tasks.get_mut(next.arena_index()) {
            desc.native_owner = Some(me);
        }
        state.current = Some(next);
        state.phase = SchedulerPhase::RunningLegacy;
        trace!(from = ?from, to = ?next, "task switched");
        Dispatch::Switched { from, to: next }
    }

    fn drain(&self, state: &mut SchedulerState) -> Dispatch {
        if let Some(last) = state.current.take() {
            let native = state.native_context;
            if let Some(old) = state.tasks.get_mut(last.arena_index()) {
                self.bridge.switch_context(&mut old.legacy_context, &native);
                old.native_owner = None;
            }
        }
        if let Some(reaped) = state.reap_pending_kill() {
            trace!(task = ?reaped, "pending kill reaped");
        }
        if state.phase != SchedulerPhase::Draining {
            debug!("all tasks terminated");
        }
        state.phase = SchedulerPhase::Draining;
        Dispatch::Drained
    }

    fn caller_is_legacy(state: &SchedulerState) -> bool {
        let me = thread::current().id();
        state
            .current
            .and_then(|h| state.tasks.get(h.arena_index()))
            .is_some_and(|desc| desc.native_owner == Some(me))
    }

    // =====================================================================
    // Pinning
    // =====================================================================

    /// Pins dispatch to the current task (`true`) or clears the pin (`false`).
    ///
    /// Returns the previous pin. Other tasks keep their pending events while
    /// pinned out. A terminating current task cannot be pinned.
    pub fn lock_current(&self, lock: bool) -> Option<TaskHandle> {
        let mut state = self.state.lock();
        let previous = state.locked;
        state.locked = if lock {
            state.current.filter(|&h| state.live(h).is_ok())
        } else {
            None
        };
        debug!(previous = ?previous, locked = ?state.locked, "dispatch pin changed");
        previous
    }

    /// The pinned task, if any.
    #[must_use]
    pub fn locked_task(&self) -> Option<TaskHandle> {
        self.state.lock().locked
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// The task whose frame is executing.
    #[must_use]
    pub fn current(&self) -> Option<TaskHandle> {
        self.state.lock().current
    }

    /// Successor of `handle` in the ready list.
    ///
    /// `Ok(None)` at the tail or for a task that is not linked.
    pub fn get_next(&self, handle: TaskHandle) -> Result<Option<TaskHandle>> {
        let state = self.state.lock();
        let desc = state.live(handle)?;
        Ok(if desc.linked { desc.next } else { None })
    }

    /// Head of the ready list.
    #[must_use]
    pub fn first_ready(&self) -> Option<TaskHandle> {
        self.state.lock().ready.head()
    }

    /// Every linked task in dispatch order.
    #[must_use]
    pub fn ready_tasks(&self) -> Vec<TaskHandle> {
        let state = self.state.lock();
        state.ready.iter(&state.tasks).map(|desc| desc.handle).collect()
    }

    /// Number of started tasks that have not begun termination.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.lock().task_count
    }

    /// Snapshot of a resident task, including one awaiting deletion.
    pub fn task_info(&self, handle: TaskHandle) -> Result<TaskInfo> {
        Ok(self.state.lock().descriptor(handle)?.info())
    }

    /// True if `handle` names a task that has not begun termination.
    #[must_use]
    pub fn is_task(&self, handle: TaskHandle) -> bool {
        self.state.lock().live(handle).is_ok()
    }

    /// True while the task's memory is held, including the pending-kill slot.
    #[must_use]
    pub fn is_resident(&self, handle: TaskHandle) -> bool {
        self.state.lock().descriptor(handle).is_ok()
    }

    /// The task awaiting deferred deletion.
    #[must_use]
    pub fn pending_kill(&self) -> Option<TaskHandle> {
        self.state.lock().pending_kill.get()
    }

    /// Current dispatch phase.
    #[must_use]
    pub fn phase(&self) -> SchedulerPhase {
        self.state.lock().phase
    }

    /// Checks the scheduler's structural invariants.
    pub fn check_invariants(&self) -> core::result::Result<(), String> {
        self.state.lock().validate()
    }

    // =====================================================================
    // Task attributes
    // =====================================================================

    /// Installs the callback run once when termination begins.
    pub fn set_termination_handler<F>(&self, handle: TaskHandle, handler: F) -> Result<()>
    where
        F: FnOnce(TaskHandle) + Send + 'static,
    {
        let mut state = self.state.lock();
        state.live_mut(handle)?.termination_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Sets the message queue used to route wake-ups; returns the previous one.
    pub fn set_queue_affinity(
        &self,
        handle: TaskHandle,
        queue: Option<QueueId>,
    ) -> Result<Option<QueueId>> {
        let mut state = self.state.lock();
        let desc = state.live_mut(handle)?;
        Ok(core::mem::replace(&mut desc.queue_affinity, queue))
    }

    /// Finds the live task bound to `queue`.
    #[must_use]
    pub fn find_by_queue(&self, queue: QueueId) -> Option<TaskHandle> {
        let state = self.state.lock();
        let found = state
            .tasks
            .iter()
            .find(|(_, desc)| desc.alive && desc.queue_affinity == Some(queue))
            .map(|(_, desc)| desc.handle);
        found
    }

    // =====================================================================
    // Thunks
    // =====================================================================

    /// Allocates a thunk from a task's pool.
    pub fn alloc_thunk(&self, handle: TaskHandle) -> Result<Thunk> {
        self.state.lock().live_mut(handle)?.thunks.alloc()
    }

    /// Returns a thunk to its task's pool.
    ///
    /// Accepted while the task awaits deletion so termination handlers can
    /// release their thunks.
    pub fn free_thunk(&self, handle: TaskHandle, thunk: Thunk) -> Result<()> {
        self.state.lock().descriptor_mut(handle)?.thunks.free(thunk)
    }

    /// Binds an allocated thunk to a call target and context value.
    pub fn bind_thunk(
        &self,
        handle: TaskHandle,
        thunk: Thunk,
        target: ThunkTarget,
        context: u64,
    ) -> Result<()> {
        self.state
            .lock()
            .live_mut(handle)?
            .thunks
            .bind(thunk, target, context)
    }

    /// Calls through a bound thunk. The target runs without the lock held.
    pub fn call_thunk(&self, handle: TaskHandle, thunk: Thunk, arg: u32) -> Result<u32> {
        let (target, context) = {
            let state = self.state.lock();
            let desc = state.live(handle)?;
            desc.thunks.resolve(thunk)?
        };
        Ok(target(context, arg))
    }
}
