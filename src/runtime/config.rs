//! Scheduler configuration types.
//!
//! Most callers go through [`SchedulerBuilder`](super::builder::SchedulerBuilder)
//! instead of filling in a [`SchedulerConfig`] by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_tasks` | 256 |
//! | `stack_size` | 64 KiB (minimum 4 KiB) |
//! | `thunks_per_block` | 32 |
//! | `max_thunk_blocks` | 64 |
//! | `fatal_response` | `Abort` |

/// Smallest virtual stack handed to a task.
pub const MIN_STACK_SIZE: usize = 4 * 1024;
/// Default virtual stack size.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
/// Default number of live task descriptors.
pub const DEFAULT_MAX_TASKS: usize = 256;
/// Default number of slots per thunk block.
pub const DEFAULT_THUNKS_PER_BLOCK: usize = 32;
/// Default cap on thunk blocks per task.
pub const DEFAULT_MAX_THUNK_BLOCKS: usize = 64;

/// What to do when the dispatch guard detects a reentrant entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalResponse {
    /// Log and abort the process.
    #[default]
    Abort,
    /// Log and panic on the offending thread.
    Panic,
}

impl FatalResponse {
    /// Parses `abort` / `panic` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(Self::Abort),
            "panic" => Some(Self::Panic),
            _ => None,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of resident task descriptors (including pending-kill).
    pub max_tasks: usize,
    /// Virtual stack size per task, in bytes.
    pub stack_size: usize,
    /// Slots allocated each time a thunk pool grows.
    pub thunks_per_block: usize,
    /// Maximum number of thunk blocks per task.
    pub max_thunk_blocks: usize,
    /// Response to a reentrant dispatch.
    pub fatal_response: FatalResponse,
}

impl SchedulerConfig {
    /// Normalize configuration values to safe minimums.
    pub fn normalize(&mut self) {
        if self.max_tasks == 0 {
            self.max_tasks = 1;
        }
        if self.stack_size < MIN_STACK_SIZE {
            self.stack_size = MIN_STACK_SIZE;
        }
        if self.thunks_per_block == 0 {
            self.thunks_per_block = 1;
        }
        self.thunks_per_block = self.thunks_per_block.min(usize::from(u16::MAX));
        if self.max_thunk_blocks == 0 {
            self.max_thunk_blocks = 1;
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            stack_size: DEFAULT_STACK_SIZE,
            thunks_per_block: DEFAULT_THUNKS_PER_BLOCK,
            max_thunk_blocks: DEFAULT_MAX_THUNK_BLOCKS,
            fatal_response: FatalResponse::Abort,
        }
    }
}
