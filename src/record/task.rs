//! Task descriptor records.
//!
//! One [`TaskDescriptor`] exists per legacy task from `create_task` until its
//! physical deletion. Descriptors live in the scheduler's arena; the ready
//! list threads through them via the intrusive `next` link.

use crate::error::{Error, Result};
use crate::runtime::thunk::{ThunkPool, ThunkStats};
use crate::types::{LegacyContext, ModuleRef, Priority, QueueId, TaskHandle};
use core::fmt;
use std::thread::ThreadId;

/// Callback run once when a task begins termination.
pub type TerminationHandler = Box<dyn FnOnce(TaskHandle) + Send + 'static>;

/// Backing memory for a task's virtual stack.
///
/// The bytes are owned here so that deleting the descriptor is what releases
/// them; the bridge addresses the area through the task's saved context.
pub struct VirtualStack {
    bytes: Box<[u8]>,
}

impl VirtualStack {
    /// Allocates a zeroed stack of `size` bytes.
    ///
    /// Reports `OutOfResources` if the allocator refuses the request.
    pub fn allocate(size: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| Error::OutOfResources {
                resource: "stack memory",
                requested: size,
                limit: 0,
            })?;
        bytes.resize(size, 0);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// Size of the stack area in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-sized stack.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for VirtualStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualStack")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Scheduler-side record of a legacy task.
pub struct TaskDescriptor {
    /// Handle of this descriptor.
    pub handle: TaskHandle,
    /// Module the task was loaded from.
    pub module: ModuleRef,
    /// Dispatch priority, always within the legal band.
    pub priority: Priority,
    /// Pending wake-up events.
    pub pending_events: u32,
    /// Preferred successor requested by a directed yield.
    pub yield_target: Option<TaskHandle>,
    /// Next descriptor in the ready list.
    pub(crate) next: Option<TaskHandle>,
    /// True while the descriptor is threaded into the ready list.
    pub(crate) linked: bool,
    /// OS thread currently executing this task's legacy frame.
    pub native_owner: Option<ThreadId>,
    /// Saved frame; only swapped, never interpreted.
    pub legacy_context: LegacyContext,
    /// Invoked once when termination begins.
    pub(crate) termination_handler: Option<TerminationHandler>,
    /// Message queue used to route wake-ups.
    pub queue_affinity: Option<QueueId>,
    /// False once termination has begun.
    pub alive: bool,
    /// True once `start_task` has counted this task.
    pub started: bool,
    pub(crate) stack: VirtualStack,
    pub(crate) thunks: ThunkPool,
}

impl TaskDescriptor {
    /// Creates an unlinked, alive descriptor.
    #[must_use]
    pub fn new(
        handle: TaskHandle,
        module: ModuleRef,
        priority: Priority,
        initial_context: LegacyContext,
        stack: VirtualStack,
        thunks: ThunkPool,
    ) -> Self {
        Self {
            handle,
            module,
            priority,
            pending_events: 0,
            yield_target: None,
            next: None,
            linked: false,
            native_owner: None,
            legacy_context: initial_context,
            termination_handler: None,
            queue_affinity: None,
            alive: true,
            started: false,
            stack,
            thunks,
        }
    }

    /// Returns true if the task is linked and has something to do.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.linked && self.alive && self.pending_events > 0
    }

    /// Returns true while the descriptor is in the ready list.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Size of the task's virtual stack.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Builds a detached snapshot of this descriptor.
    #[must_use]
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            handle: self.handle,
            module: self.module,
            priority: self.priority,
            pending_events: self.pending_events,
            yield_target: self.yield_target,
            linked: self.linked,
            alive: self.alive,
            started: self.started,
            native_owner: self.native_owner,
            queue_affinity: self.queue_affinity,
            has_termination_handler: self.termination_handler.is_some(),
            stack_size: self.stack.len(),
            thunks: self.thunks.stats(),
        }
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("handle", &self.handle)
            .field("module", &self.module)
            .field("priority", &self.priority)
            .field("pending_events", &self.pending_events)
            .field("yield_target", &self.yield_target)
            .field("next", &self.next)
            .field("linked", &self.linked)
            .field("native_owner", &self.native_owner)
            .field("alive", &self.alive)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a task, safe to hold without the scheduler lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task handle.
    pub handle: TaskHandle,
    /// Originating module.
    pub module: ModuleRef,
    /// Current priority.
    pub priority: Priority,
    /// Pending wake-up events.
    pub pending_events: u32,
    /// Directed-yield target not yet consumed.
    pub yield_target: Option<TaskHandle>,
    /// Whether the task is in the ready list.
    pub linked: bool,
    /// Whether termination has not yet begun.
    pub alive: bool,
    /// Whether the task was started.
    pub started: bool,
    /// Thread executing the task's frame, if running.
    pub native_owner: Option<ThreadId>,
    /// Wake-up routing queue.
    pub queue_affinity: Option<QueueId>,
    /// Whether a termination handler is still installed.
    pub has_termination_handler: bool,
    /// Virtual stack size in bytes.
    pub stack_size: usize,
    /// Thunk pool usage.
    pub thunks: ThunkStats,
}
