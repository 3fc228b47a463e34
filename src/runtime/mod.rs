//! Scheduler runtime: configuration, the host bridge, and the dispatcher.
//!
//! # Building a scheduler
//!
//! ```
//! use legacy_sched::runtime::{ParkingBridge, SchedulerBuilder};
//! use legacy_sched::types::{LegacyContext, ModuleRef};
//!
//! let scheduler = SchedulerBuilder::new()
//!     .max_tasks(16)
//!     .build(ParkingBridge::new());
//!
//! let task = scheduler
//!     .create_task(ModuleRef(1), 0, LegacyContext::new(0x1000, 0))
//!     .unwrap();
//! scheduler.start_task(task).unwrap();
//! scheduler.post_event(task).unwrap();
//! assert_eq!(scheduler.reschedule().task(), Some(task));
//! ```
//!
//! # Configuration from the environment
//!
//! ```ignore
//! let scheduler = SchedulerBuilder::new()
//!     .with_env_overrides()?
//!     .build(ParkingBridge::new());
//! ```

pub mod bridge;
pub mod builder;
pub mod config;
pub mod env_config;
pub mod scheduler;
pub mod state;
pub mod thunk;

pub use bridge::{HostBridge, ParkingBridge};
pub use builder::SchedulerBuilder;
pub use config::{FatalResponse, SchedulerConfig};
pub use scheduler::{Dispatch, Scheduler};
pub use state::{PendingKill, SchedulerPhase, SchedulerState};
pub use thunk::{Thunk, ThunkPool, ThunkStats, ThunkTarget};
