//! Scheduler state: descriptor store, ready list, and dispatch bookkeeping.
//!
//! There is exactly one [`SchedulerState`] per [`Scheduler`](super::Scheduler),
//! always accessed through its lock. All methods here assume the lock is held
//! and never block.

use crate::error::{Error, Result};
use crate::record::{TaskDescriptor, VirtualStack};
use crate::runtime::config::SchedulerConfig;
use crate::runtime::scheduler::ready::ReadyList;
use crate::runtime::thunk::ThunkPool;
use crate::tracing_compat::{debug, trace};
use crate::types::{LegacyContext, ModuleRef, Priority, TaskHandle};
use crate::util::Arena;
use std::thread::ThreadId;

/// Observable state of the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    /// No legacy frame has been dispatched yet, or the last one left.
    #[default]
    NoCurrentTask,
    /// A dispatch cycle is choosing a task or waiting for an event.
    Dispatching,
    /// A legacy frame is executing.
    RunningLegacy,
    /// Every started task has terminated.
    Draining,
}

/// Deferred-deletion slot for a task that terminated while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingKill(Option<TaskHandle>);

impl PendingKill {
    /// The parked task, if any.
    #[must_use]
    pub const fn get(&self) -> Option<TaskHandle> {
        self.0
    }

    /// Parks `handle`, returning the previous occupant.
    pub fn replace(&mut self, handle: TaskHandle) -> Option<TaskHandle> {
        self.0.replace(handle)
    }

    /// Empties the slot.
    pub fn take(&mut self) -> Option<TaskHandle> {
        self.0.take()
    }
}

/// Everything guarded by the scheduler lock.
#[derive(Debug)]
pub struct SchedulerState {
    pub(crate) tasks: Arena<TaskDescriptor>,
    pub(crate) ready: ReadyList,
    pub(crate) current: Option<TaskHandle>,
    pub(crate) pending_kill: PendingKill,
    pub(crate) locked: Option<TaskHandle>,
    pub(crate) task_count: usize,
    pub(crate) phase: SchedulerPhase,
    /// Frame of the native caller while no legacy task is current.
    pub(crate) native_context: LegacyContext,
    pub(crate) started_any: bool,
    /// Thread running a dispatch cycle, including its unlocked wait.
    pub(crate) dispatcher: Option<ThreadId>,
    stack_size: usize,
    thunks_per_block: usize,
    max_thunk_blocks: usize,
}

impl SchedulerState {
    /// Creates an empty state sized by `config`.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            tasks: Arena::with_limit(config.max_tasks),
            ready: ReadyList::new(),
            current: None,
            pending_kill: PendingKill::default(),
            locked: None,
            task_count: 0,
            phase: SchedulerPhase::NoCurrentTask,
            native_context: LegacyContext::default(),
            started_any: false,
            dispatcher: None,
            stack_size: config.stack_size,
            thunks_per_block: config.thunks_per_block,
            max_thunk_blocks: config.max_thunk_blocks,
        }
    }

    /// Descriptor of a resident task, alive or not.
    pub fn descriptor(&self, handle: TaskHandle) -> Result<&TaskDescriptor> {
        self.tasks
            .get(handle.arena_index())
            .ok_or(Error::not_found(handle))
    }

    /// Mutable descriptor of a resident task, alive or not.
    pub fn descriptor_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskDescriptor> {
        self.tasks
            .get_mut(handle.arena_index())
            .ok_or(Error::not_found(handle))
    }

    /// Descriptor of a task that has not begun termination.
    pub fn live(&self, handle: TaskHandle) -> Result<&TaskDescriptor> {
        match self.tasks.get(handle.arena_index()) {
            Some(desc) if desc.alive => Ok(desc),
            _ => Err(Error::not_found(handle)),
        }
    }

    /// Mutable descriptor of a task that has not begun termination.
    pub fn live_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskDescriptor> {
        match self.tasks.get_mut(handle.arena_index()) {
            Some(desc) if desc.alive => Ok(desc),
            _ => Err(Error::not_found(handle)),
        }
    }

    /// Returns true if `handle` is linked and has a pending event.
    #[must_use]
    pub fn is_ready(&self, handle: TaskHandle) -> bool {
        self.tasks
            .get(handle.arena_index())
            .is_some_and(TaskDescriptor::is_ready)
    }

    /// Allocates a descriptor with its stack and an empty thunk pool.
    ///
    /// Nothing is left behind on failure.
    pub fn create(
        &mut self,
        module: ModuleRef,
        priority: Priority,
        initial_context: LegacyContext,
    ) -> Result<TaskHandle> {
        if self.tasks.is_full() {
            return Err(self.slots_exhausted());
        }
        let stack = VirtualStack::allocate(self.stack_size)?;
        let (per_block, max_blocks) = (self.thunks_per_block, self.max_thunk_blocks);
        let index = self
            .tasks
            .try_insert_with(move |index| {
                let handle = TaskHandle::from_arena(index);
                TaskDescriptor::new(
                    handle,
                    module,
                    priority,
                    initial_context,
                    stack,
                    ThunkPool::new(handle, per_block, max_blocks),
                )
            })
            .ok_or_else(|| self.slots_exhausted())?;
        Ok(TaskHandle::from_arena(index))
    }

    fn slots_exhausted(&self) -> Error {
        Error::OutOfResources {
            resource: "task slots",
            requested: self.tasks.len() + 1,
            limit: self.tasks.limit(),
        }
    }

    /// Physically deletes a descriptor, releasing its stack and thunk pool.
    pub fn delete(&mut self, handle: TaskHandle) -> Option<TaskDescriptor> {
        self.ready.unlink(handle, &mut self.tasks);
        let desc = self.tasks.remove(handle.arena_index())?;
        debug!(
            task = ?handle,
            stack = desc.stack_size(),
            thunks = desc.thunks.stats().capacity,
            "task deleted"
        );
        Some(desc)
    }

    /// Deletes the pending-kill task unless it is still current.
    pub fn reap_pending_kill(&mut self) -> Option<TaskHandle> {
        let parked = self.pending_kill.get()?;
        if self.current == Some(parked) {
            return None;
        }
        self.pending_kill.take();
        self.delete(parked);
        Some(parked)
    }

    /// Picks the next task to run.
    ///
    /// Consumes the yield target of the current task and, when a different
    /// task is yielding, that task's target too. A pin vetoes any candidate
    /// other than the pinned task.
    pub fn select_candidate(&mut self, yielding: Option<TaskHandle>) -> Option<TaskHandle> {
        let current_target = self.take_yield_target(self.current);
        let caller_target = if yielding == self.current {
            None
        } else {
            self.take_yield_target(yielding)
        };

        let mut candidate = None;
        if let Some(target) = current_target.or(caller_target) {
            if self.is_ready(target) {
                trace!(target = ?target, "directed yield honored");
                candidate = Some(target);
            } else {
                trace!(target = ?target, "directed yield target idle");
            }
        }
        let candidate = candidate.or_else(|| self.ready.first_ready(&self.tasks));

        match self.locked {
            Some(pin) if candidate != Some(pin) => {
                trace!(pin = ?pin, vetoed = ?candidate, "candidate locked out");
                None
            }
            _ => candidate,
        }
    }

    fn take_yield_target(&mut self, handle: Option<TaskHandle>) -> Option<TaskHandle> {
        handle
            .and_then(|h| self.tasks.get_mut(h.arena_index()))
            .and_then(|desc| desc.yield_target.take())
    }

    /// Number of started, live tasks recomputed from the descriptors.
    fn counted_live(&self) -> usize {
        self.tasks
            .iter()
            .filter(|(_, desc)| desc.alive && desc.started)
            .count()
    }

    /// Checks the structural invariants, returning a description of the first
    /// violation found.
    pub fn validate(&self) -> core::result::Result<(), String> {
        let owners = self
            .tasks
            .iter()
            .filter(|(_, desc)| desc.native_owner.is_some())
            .count();
        if owners > 1 {
            return Err(format!("{owners} descriptors have a native owner"));
        }

        let mut walked = 0usize;
        let mut last: Option<Priority> = None;
        for desc in self.ready.iter(&self.tasks) {
            walked += 1;
            if walked > self.tasks.len() {
                return Err("ready list is cyclic".to_string());
            }
            if !desc.linked {
                return Err(format!("{:?} reachable but not flagged linked", desc.handle));
            }
            if !desc.alive {
                return Err(format!("{:?} linked after termination", desc.handle));
            }
            if last.is_some_and(|prev| prev < desc.priority) {
                return Err(format!("{:?} breaks priority order", desc.handle));
            }
            last = Some(desc.priority);
        }
        let flagged = self.tasks.iter().filter(|(_, desc)| desc.linked).count();
        if walked != self.ready.len() || flagged != walked {
            return Err(format!(
                "ready list walked {walked}, len {}, flagged {flagged}",
                self.ready.len()
            ));
        }

        if let Some(parked) = self.pending_kill.get() {
            match self.tasks.get(parked.arena_index()) {
                None => return Err(format!("pending kill {parked:?} is not resident")),
                Some(desc) if desc.linked || desc.alive => {
                    return Err(format!("pending kill {parked:?} is still schedulable"));
                }
                Some(_) => {}
            }
        }
        if let Some(pin) = self.locked {
            if self.live(pin).is_err() {
                return Err(format!("pinned task {pin:?} is gone"));
            }
        }
        if let Some(current) = self.current {
            if !self.tasks.contains(current.arena_index()) {
                return Err(format!("current task {current:?} is not resident"));
            }
        }
        let live = self.counted_live();
        if live != self.task_count {
            return Err(format!(
                "task_count {} but {live} started tasks are alive",
                self.task_count
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn state(max_tasks: usize) -> SchedulerState {
        let mut config = SchedulerConfig {
            max_tasks,
            ..SchedulerConfig::default()
        };
        config.normalize();
        SchedulerState::new(&config)
    }

    #[test]
    fn create_respects_slot_limit() {
        crate::test_utils::init_test_logging();
        let mut st = state(2);
        st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        let err = st
            .create(ModuleRef(1), 0, LegacyContext::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfResources);
        assert_eq!(st.tasks.len(), 2);
        assert!(st.validate().is_ok());
    }

    #[test]
    fn deleted_handle_is_not_found_after_reuse() {
        let mut st = state(4);
        let old = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        st.delete(old).unwrap();
        let fresh = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        assert_ne!(old, fresh);
        assert!(matches!(st.descriptor(old), Err(Error::NotFound { .. })));
        assert!(st.descriptor(fresh).is_ok());
    }

    #[test]
    fn reap_skips_current() {
        let mut st = state(4);
        let h = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        st.descriptor_mut(h).unwrap().alive = false;
        st.pending_kill.replace(h);
        st.current = Some(h);
        assert_eq!(st.reap_pending_kill(), None);
        st.current = None;
        assert_eq!(st.reap_pending_kill(), Some(h));
        assert!(st.descriptor(h).is_err());
        assert_eq!(st.pending_kill.get(), None);
    }

    #[test]
    fn pin_vetoes_any_other_candidate() {
        let mut st = state(4);
        let high = st.create(ModuleRef(1), 10, LegacyContext::default()).unwrap();
        let pin = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        for h in [high, pin] {
            st.ready.link(h, &mut st.tasks);
        }
        st.descriptor_mut(high).unwrap().pending_events = 1;
        st.locked = Some(pin);
        assert_eq!(st.select_candidate(None), None);

        // Both ready: the list head still wins the pick, so the pin rejects it.
        st.descriptor_mut(pin).unwrap().pending_events = 1;
        assert_eq!(st.select_candidate(None), None);
        assert_eq!(st.descriptor(high).unwrap().pending_events, 1);

        st.descriptor_mut(high).unwrap().pending_events = 0;
        assert_eq!(st.select_candidate(None), Some(pin));
    }

    #[test]
    fn yielding_caller_target_is_consumed() {
        let mut st = state(4);
        let current = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        let caller = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        let target = st.create(ModuleRef(1), -5, LegacyContext::default()).unwrap();
        for h in [current, caller, target] {
            st.ready.link(h, &mut st.tasks);
        }
        st.current = Some(current);
        st.descriptor_mut(current).unwrap().pending_events = 1;
        st.descriptor_mut(target).unwrap().pending_events = 1;
        st.descriptor_mut(caller).unwrap().yield_target = Some(target);

        assert_eq!(st.select_candidate(Some(caller)), Some(target));
        assert_eq!(st.descriptor(caller).unwrap().yield_target, None);
    }

    #[test]
    fn validate_reports_double_owner() {
        let mut st = state(4);
        let a = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        let b = st.create(ModuleRef(1), 0, LegacyContext::default()).unwrap();
        let me = std::thread::current().id();
        st.descriptor_mut(a).unwrap().native_owner = Some(me);
        st.descriptor_mut(b).unwrap().native_owner = Some(me);
        assert!(st.validate().is_err());
    }
}
