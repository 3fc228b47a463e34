//! Error types for the scheduler.
//!
//! Failures surface only at the boundaries where a caller can act on them:
//! task lookup, task creation, and the thunk allocator. Everything else the
//! scheduler does is total from the point of view of legacy code.
//!
//! # Error Kinds
//!
//! | Kind | Raised by | Recoverability |
//! |------|-----------|----------------|
//! | `NotFound` | any operation taking a handle | `Permanent` (the handle will never become valid) |
//! | `OutOfResources` | `create_task`, `alloc_thunk` | `Transient` (retry after tasks exit) |
//! | `InvalidThunk` | `free_thunk`, `bind_thunk`, `call_thunk` | `Permanent` |
//! | `ReentrancyViolation` | dispatch re-entry | `Fatal` (never returned as a value) |
//!
//! `ReentrancyViolation` only exists as a kind: the dispatch guard logs it and
//! then aborts or panics according to [`FatalResponse`](crate::runtime::FatalResponse).

use crate::types::TaskHandle;
use crate::runtime::thunk::Thunk;

/// The kind of a scheduler error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown, stale, or already-deleted task handle.
    NotFound,
    /// A bounded resource (task slots, stack memory, thunk blocks) ran out.
    OutOfResources,
    /// Double free or a thunk that does not belong to the task's pool.
    InvalidThunk,
    /// Dispatch entered from outside the designated scheduling path.
    ReentrancyViolation,
}

impl ErrorKind {
    /// Returns the recoverability classification for this kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::OutOfResources => Recoverability::Transient,
            Self::NotFound | Self::InvalidThunk => Recoverability::Permanent,
            Self::ReentrancyViolation => Recoverability::Fatal,
        }
    }

    /// Returns a stable lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::OutOfResources => "out_of_resources",
            Self::InvalidThunk => "invalid_thunk",
            Self::ReentrancyViolation => "reentrancy_violation",
        }
    }
}

/// Classification of how a caller may react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// May succeed later once resources are released.
    Transient,
    /// Retrying the same call cannot succeed.
    Permanent,
    /// The process cannot continue safely.
    Fatal,
}

impl Recoverability {
    /// Returns true if retrying later may succeed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Why a thunk was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkFault {
    /// The slot is already on the free list.
    AlreadyFree,
    /// The thunk was issued by a different task's pool.
    ForeignOwner,
    /// The block/slot coordinates are outside the pool.
    OutOfRange,
    /// The slot was allocated but never bound to a target.
    Unbound,
}

impl core::fmt::Display for ThunkFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::AlreadyFree => "already free",
            Self::ForeignOwner => "owned by another task",
            Self::OutOfRange => "outside the pool",
            Self::Unbound => "not bound to a target",
        })
    }
}

/// Errors returned by scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The handle does not name a live task.
    #[error("task {handle:?} not found")]
    NotFound {
        /// The offending handle.
        handle: TaskHandle,
    },

    /// Allocation of a bounded resource failed; nothing was left behind.
    #[error("out of {resource}: requested {requested}, limit {limit}")]
    OutOfResources {
        /// Which resource ran out.
        resource: &'static str,
        /// Units requested by the failing call.
        requested: usize,
        /// Configured limit, or 0 when the system allocator refused.
        limit: usize,
    },

    /// The thunk cannot be used with this task's pool.
    #[error("invalid thunk {thunk:?} for task {handle:?}: {fault}")]
    InvalidThunk {
        /// Task whose pool was addressed.
        handle: TaskHandle,
        /// The rejected thunk.
        thunk: Thunk,
        /// Why it was rejected.
        fault: ThunkFault,
    },
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::OutOfResources { .. } => ErrorKind::OutOfResources,
            Self::InvalidThunk { .. } => ErrorKind::InvalidThunk,
        }
    }

    /// Shorthand for the recoverability of this error's kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind().recoverability()
    }

    pub(crate) const fn not_found(handle: TaskHandle) -> Self {
        Self::NotFound { handle }
    }
}

/// Errors raised while assembling a [`SchedulerConfig`](crate::runtime::SchedulerConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or file key held an unparseable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable or key name.
        key: String,
        /// Parser message.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// Path that was read.
        path: String,
        /// I/O error text.
        reason: String,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Result alias for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;
