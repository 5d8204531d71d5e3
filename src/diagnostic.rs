//! Fatal diagnostics for usage errors.
//!
//! A PGAS job has no notion of partial failure: once one rank detects an
//! inconsistent state (a promise fulfilled twice, a persona scope popped out
//! of order, a device pointer dereferenced on the host) the whole job is
//! wrong. [`fatal`] reports the rank, the caller's source location and a
//! message, then ends the process.
//!
//! Tests switch to [`FatalMode::Panic`] so the failure unwinds instead of
//! aborting and can be observed with `#[should_panic]`.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::tracing_compat::error;

/// What [`fatal`] does after reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FatalMode {
    /// Print the diagnostic and abort the process.
    #[default]
    Abort,
    /// Print the diagnostic and panic with it.
    Panic,
}

impl FatalMode {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Abort => 0,
            Self::Panic => 1,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Panic,
            _ => Self::Abort,
        }
    }
}

static FATAL_MODE: AtomicU8 = AtomicU8::new(0);

/// Sets the process-wide fatal mode.
pub fn set_fatal_mode(mode: FatalMode) {
    FATAL_MODE.store(mode.to_u8(), Ordering::Release);
}

/// Returns the process-wide fatal mode.
#[must_use]
pub fn fatal_mode() -> FatalMode {
    FatalMode::from_u8(FATAL_MODE.load(Ordering::Acquire))
}

/// Formats the one-line diagnostic reported by [`fatal`].
#[must_use]
pub fn format_diagnostic(
    rank: Option<crate::Rank>,
    location: &Location<'_>,
    msg: &dyn fmt::Display,
) -> String {
    let file = location.file();
    let line = location.line();
    match rank {
        Some(rank) => format!("assertion failure on rank {rank} [{file}:{line}]: {msg}"),
        None => format!("assertion failure [{file}:{line}]: {msg}"),
    }
}

/// Reports a usage error and ends the job.
#[track_caller]
#[cold]
pub fn fatal(msg: impl fmt::Display) -> ! {
    let location = Location::caller();
    let rank = crate::runtime::current_rank();
    let line = format_diagnostic(rank, location, &msg);
    error!(rank = ?rank, "{line}");
    match fatal_mode() {
        FatalMode::Abort => {
            eprintln!("{line}");
            std::process::abort()
        }
        FatalMode::Panic => panic!("{line}"),
    }
}

/// Asserts a runtime invariant, reporting through [`fatal`] on failure.
///
/// ```ignore
/// pgas_assert!(rank < rank_n, "rank {rank} out of range");
/// ```
#[macro_export]
macro_rules! pgas_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::diagnostic::fatal(::std::format!($($arg)+));
        }
    };
}
