//! Test utilities.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A scheduler constructor that panics on misuse and never blocks forever
//!
//! # Example
//! ```
//! use legacy_sched::test_utils::{init_test_logging, test_scheduler};
//!
//! init_test_logging();
//! let scheduler = test_scheduler();
//! assert_eq!(scheduler.task_count(), 0);
//! ```

use crate::runtime::{FatalResponse, ParkingBridge, Scheduler, SchedulerBuilder};
use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = const_mutex(());

/// How long a test bridge waits for an external event before retrying.
pub const TEST_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock()
}

/// Scheduler for tests: reentrancy panics, and external waits time out.
#[must_use]
pub fn test_scheduler() -> Scheduler<ParkingBridge> {
    test_builder().build(ParkingBridge::with_timeout(TEST_WAIT_TIMEOUT))
}

/// Builder preconfigured the way [`test_scheduler`] is.
#[must_use]
pub fn test_builder() -> SchedulerBuilder {
    SchedulerBuilder::new().fatal_response(FatalResponse::Panic)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
