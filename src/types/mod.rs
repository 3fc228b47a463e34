//! Core types: identifiers, priorities, and saved contexts.

pub mod context;
pub mod id;

pub use context::{clamp_priority, LegacyContext, Priority, PRIORITY_MAX, PRIORITY_MIN};
pub use id::{ModuleRef, QueueId, TaskHandle};
