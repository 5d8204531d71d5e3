//! Logging facade used by every runtime module.
//!
//! With the `tracing-integration` feature (on by default) this re-exports the
//! `tracing` event macros. Without it the macros expand to nothing, so the
//! progress loop pays nothing for its log statements.
//!
//! ```rust,ignore
//! use pgasync::tracing_compat::{debug, trace};
//!
//! debug!(rank = rt.rank_me(), team = %team.id(), "barrier arrived");
//! trace!(collective = %id, "broadcast value arrived");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op trace-level event.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level event.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level event.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level event.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level event.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn events_accept_structured_fields() {
        init_test_logging();
        crate::test_phase!("events_accept_structured_fields");
        trace!(packets = 3_usize, "poll");
        debug!(rank = 3_usize, team = "world", "barrier arrived");
        info!(ranks = 4_usize, "runtime initialized");
        warn!(persona = 9_u64, "dropping packet for a persona that no longer exists");
        error!(rank = 0_usize, "assertion failure");
        crate::test_complete!("events_accept_structured_fields");
    }
}
