//! Dispatch reentrancy guard.
//!
//! Dispatch must never be entered twice on the same thread: a bridge that
//! calls back into `reschedule` from `switch_context` or from the external
//! wait would either deadlock on the scheduler lock or run a second dispatch
//! over a half-switched state. A thread-local flag is raised for the whole
//! dispatch cycle, and entering with the flag already raised is fatal.

use crate::error::ErrorKind;
use crate::runtime::config::FatalResponse;
use crate::tracing_compat::error;
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static IN_DISPATCH: Cell<bool> = const { Cell::new(false) };
}

/// RAII marker for an active dispatch on this thread.
#[derive(Debug)]
pub(crate) struct DispatchGuard {
    // Thread-affine: the flag belongs to the thread that raised it.
    _not_send: PhantomData<*const ()>,
}

impl DispatchGuard {
    /// Raises the flag, or handles a reentrancy violation if already raised.
    pub(crate) fn enter(response: FatalResponse) -> Self {
        if IN_DISPATCH.with(|flag| flag.replace(true)) {
            violation(response, "dispatch re-entered on the dispatching thread");
        }
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        IN_DISPATCH.with(|flag| flag.set(false));
    }
}

/// Returns true while the current thread is inside a dispatch cycle.
#[must_use]
pub fn in_dispatch() -> bool {
    IN_DISPATCH.with(Cell::get)
}

/// Logs a `ReentrancyViolation` and aborts or panics.
pub(crate) fn violation(response: FatalResponse, detail: &str) -> ! {
    error!(
        kind = ErrorKind::ReentrancyViolation.as_str(),
        thread = ?std::thread::current().id(),
        detail,
        "fatal scheduler misuse"
    );
    match response {
        FatalResponse::Abort => std::process::abort(),
        FatalResponse::Panic => panic!("reentrancy violation: {detail}"),
    }
}
