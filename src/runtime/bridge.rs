//! Host bridge: the collaborators the scheduler consumes.
//!
//! The scheduler owns no threads and performs no low-level context switch
//! itself. Everything that touches the host is funneled through
//! [`HostBridge`]:
//!
//! - the external blocking wait used when no task is ready (always called
//!   with the scheduler lock released)
//! - a probe for queued software events that must be handled outside dispatch
//! - the wake primitive that interrupts that wait
//! - the context-switch primitive that saves and restores a [`LegacyContext`]
//!
//! Implementations must not call back into `reschedule`, `wait_event`, or
//! `yield_now` from `switch_context` or `wait_for_external_event` on the
//! dispatching thread; the dispatch guard treats that as fatal.

use crate::tracing_compat::trace;
use crate::types::LegacyContext;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interfaces the scheduler consumes from the host layer.
pub trait HostBridge: Send + Sync {
    /// Blocks the calling native thread until something of interest happens.
    ///
    /// With `hardware_only` set, queued software events do not end the wait.
    /// Returns `false` if the wait gave up without an event.
    fn wait_for_external_event(&self, hardware_only: bool) -> bool;

    /// Returns true when a software event is queued that the caller must
    /// process outside the dispatch loop.
    fn software_event_pending(&self) -> bool;

    /// Interrupts a concurrent [`wait_for_external_event`](Self::wait_for_external_event).
    fn wake(&self);

    /// Saves the live frame into `outgoing` and resumes `incoming`.
    fn switch_context(&self, outgoing: &mut LegacyContext, incoming: &LegacyContext);
}

impl<B: HostBridge + ?Sized> HostBridge for Arc<B> {
    fn wait_for_external_event(&self, hardware_only: bool) -> bool {
        (**self).wait_for_external_event(hardware_only)
    }

    fn software_event_pending(&self) -> bool {
        (**self).software_event_pending()
    }

    fn wake(&self) {
        (**self).wake();
    }

    fn switch_context(&self, outgoing: &mut LegacyContext, incoming: &LegacyContext) {
        (**self).switch_context(outgoing, incoming);
    }
}

/// In-process bridge built on a condvar wake flag.
///
/// The "live frame" register stands in for the CPU state a real bridge
/// would save and restore, which makes dispatch decisions observable.
#[derive(Debug)]
pub struct ParkingBridge {
    notified: Mutex<bool>,
    cvar: Condvar,
    software_events: AtomicUsize,
    live_frame: Mutex<LegacyContext>,
    switches: AtomicU64,
    wakes: AtomicU64,
    timeout: Option<Duration>,
}

impl ParkingBridge {
    /// Creates a bridge whose waits block until woken.
    #[must_use]
    pub fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            cvar: Condvar::new(),
            software_events: AtomicUsize::new(0),
            live_frame: Mutex::new(LegacyContext::default()),
            switches: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
            timeout: None,
        }
    }

    /// Creates a bridge whose waits give up after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Queues a software event and wakes any waiter.
    pub fn queue_software_event(&self) {
        self.software_events.fetch_add(1, Ordering::AcqRel);
        self.wake();
    }

    /// Consumes one queued software event, if any.
    pub fn take_software_event(&self) -> bool {
        self.software_events
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// The frame currently loaded.
    #[must_use]
    pub fn live_frame(&self) -> LegacyContext {
        *self.live_frame.lock()
    }

    /// Replaces the live frame, as a native caller entering legacy code would.
    pub fn set_live_frame(&self, frame: LegacyContext) {
        *self.live_frame.lock() = frame;
    }

    /// Number of context switches performed.
    #[must_use]
    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Acquire)
    }

    /// Number of wake-ups delivered.
    #[must_use]
    pub fn wake_count(&self) -> u64 {
        self.wakes.load(Ordering::Acquire)
    }
}

impl Default for ParkingBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for ParkingBridge {
    fn wait_for_external_event(&self, hardware_only: bool) -> bool {
        let mut notified = self.notified.lock();
        loop {
            if *notified {
                *notified = false;
                return true;
            }
            if !hardware_only && self.software_events.load(Ordering::Acquire) > 0 {
                return true;
            }
            match self.timeout {
                Some(timeout) => {
                    if self.cvar.wait_for(&mut notified, timeout).timed_out() {
                        let woke = *notified;
                        *notified = false;
                        return woke;
                    }
                }
                None => self.cvar.wait(&mut notified),
            }
        }
    }

    fn software_event_pending(&self) -> bool {
        self.software_events.load(Ordering::Acquire) > 0
    }

    fn wake(&self) {
        {
            let mut notified = self.notified.lock();
            *notified = true;
        }
        self.wakes.fetch_add(1, Ordering::AcqRel);
        self.cvar.notify_one();
    }

    fn switch_context(&self, outgoing: &mut LegacyContext, incoming: &LegacyContext) {
        let mut live = self.live_frame.lock();
        *outgoing = *live;
        *live = *incoming;
        self.switches.fetch_add(1, Ordering::AcqRel);
        trace!(saved = ?outgoing, loaded = ?incoming, "frame switched");
    }
}
