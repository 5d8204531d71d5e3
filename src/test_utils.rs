//! Test utilities shared by the unit tests.
//!
//! - tracing-based logging initialization
//! - phase/section macros for readable test output
//! - a process-wide lock for tests that mutate environment variables
//! - helpers that bind a single-rank runtime to the test thread

use crate::diagnostic::{set_fatal_mode, FatalMode};
use crate::runtime::{Runtime, RuntimeConfig};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once. Also switches fatal
/// diagnostics to panics so `#[should_panic]` tests can observe them.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops. `RUST_LOG` overrides the
/// level when set.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        set_fatal_mode(FatalMode::Panic);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
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
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Config used by unit tests: panics instead of aborting.
#[must_use]
pub(crate) fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        fatal_mode: Some(crate::diagnostic::FatalMode::Panic),
        ..RuntimeConfig::default()
    }
}

/// Run `f` on a fresh thread bound to a one-rank runtime, then finalize it.
pub(crate) fn with_single_rank<R, F>(f: F) -> R
where
    F: Fn(&Runtime) -> R + Sync,
    R: Send,
{
    init_test_logging();
    let mut results = crate::transport::smp::launch(1, test_config(), f);
    results.pop().expect("one rank result")
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
