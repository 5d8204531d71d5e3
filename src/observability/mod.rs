//! Runtime statistics.
//!
//! Every runtime keeps a set of monotonically increasing counters describing
//! the work it has done: progress calls, executed work items, messages and
//! transfers issued, collectives started. [`Runtime::stats`](crate::Runtime::stats)
//! returns a point-in-time [`StatsSnapshot`].
//!
//! Counters are relaxed atomics; a snapshot taken while other threads make
//! progress is a consistent-enough view for diagnostics, not a barrier.

pub mod metrics;

pub use metrics::{Counter, RuntimeStats, StatsSnapshot};
