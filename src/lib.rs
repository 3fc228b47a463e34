//! Cooperative scheduler for legacy tasks hosted under native OS threads.
//!
//! # Overview
//!
//! Legacy program units assume they are the only code running and that
//! nothing preempts them. This crate runs many such tasks on a single
//! logical thread of execution: exactly one legacy frame runs at a time,
//! tasks give up control only at explicit suspension points, and a
//! priority-ordered ready list decides who runs next. Real OS threads may
//! coexist and call in; a single lock serializes them and is released only
//! while the scheduler waits for an external event.
//!
//! # Core Guarantees
//!
//! - **One frame at a time**: at most one task has a native owner thread
//! - **Priority order**: higher priority first, round-robin within a band
//! - **No freeing under your feet**: a task that kills itself is deleted
//!   only after another frame has been switched in
//! - **No lost events**: event counters never underflow, and pinning the
//!   dispatcher to one task never drops other tasks' events
//! - **Fatal re-entry**: entering dispatch from inside dispatch aborts
//!   instead of corrupting the ready list
//!
//! # Module Structure
//!
//! - [`types`]: handles, priorities, saved contexts
//! - [`record`]: task descriptors and snapshots
//! - [`runtime`]: configuration, host bridge, thunk pools, the scheduler
//! - [`util`]: generational arena
//! - [`error`]: error types
//! - [`test_utils`]: logging and helpers shared by tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod record;
pub mod runtime;
#[cfg(any(test, feature = "tracing-integration"))]
#[doc(hidden)]
pub mod test_utils;
pub mod tracing_compat;
pub mod types;
pub mod util;

pub use error::{ConfigError, Error, ErrorKind, Recoverability, Result, ThunkFault};
pub use record::TaskInfo;
pub use runtime::{
    Dispatch, FatalResponse, HostBridge, ParkingBridge, Scheduler, SchedulerBuilder,
    SchedulerConfig, SchedulerPhase, Thunk, ThunkTarget,
};
pub use types::{
    LegacyContext, ModuleRef, Priority, QueueId, TaskHandle, PRIORITY_MAX, PRIORITY_MIN,
};
