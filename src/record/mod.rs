//! Internal records tracked by the scheduler.

pub mod task;

pub use task::{TaskDescriptor, TaskInfo, TerminationHandler, VirtualStack};
