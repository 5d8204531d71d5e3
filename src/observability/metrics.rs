//! Runtime metrics.
//!
//! Provides named counters and the per-runtime statistics built from them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Counters maintained by one runtime instance.
#[derive(Debug)]
pub struct RuntimeStats {
    /// Top-level progress calls made by threads bound to the runtime.
    pub progress_calls: Counter,
    /// Work items (callbacks, completions, packets) executed by progress.
    pub work_executed: Counter,
    /// Round-trip and one-way RPCs issued.
    pub rpcs_sent: Counter,
    /// RPC bodies executed on this rank.
    pub rpcs_executed: Counter,
    /// Packets handed to the transport.
    pub packets_sent: Counter,
    /// One-sided transfers issued.
    pub rma_ops: Counter,
    /// Collective operations started.
    pub collectives: Counter,
}

impl RuntimeStats {
    pub(crate) const fn new() -> Self {
        Self {
            progress_calls: Counter::new("progress_calls"),
            work_executed: Counter::new("work_executed"),
            rpcs_sent: Counter::new("rpcs_sent"),
            rpcs_executed: Counter::new("rpcs_executed"),
            packets_sent: Counter::new("packets_sent"),
            rma_ops: Counter::new("rma_ops"),
            collectives: Counter::new("collectives"),
        }
    }

    /// All counters, in declaration order.
    #[must_use]
    pub fn counters(&self) -> [&Counter; 7] {
        [
            &self.progress_calls,
            &self.work_executed,
            &self.rpcs_sent,
            &self.rpcs_executed,
            &self.packets_sent,
            &self.rma_ops,
            &self.collectives,
        ]
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            progress_calls: self.progress_calls.get(),
            work_executed: self.work_executed.get(),
            rpcs_sent: self.rpcs_sent.get(),
            rpcs_executed: self.rpcs_executed.get(),
            packets_sent: self.packets_sent.get(),
            rma_ops: self.rma_ops.get(),
            collectives: self.collectives.get(),
        }
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// See [`RuntimeStats::progress_calls`].
    pub progress_calls: u64,
    /// See [`RuntimeStats::work_executed`].
    pub work_executed: u64,
    /// See [`RuntimeStats::rpcs_sent`].
    pub rpcs_sent: u64,
    /// See [`RuntimeStats::rpcs_executed`].
    pub rpcs_executed: u64,
    /// See [`RuntimeStats::packets_sent`].
    pub packets_sent: u64,
    /// See [`RuntimeStats::rma_ops`].
    pub rma_ops: u64,
    /// See [`RuntimeStats::collectives`].
    pub collectives: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "progress={} work={} rpc_sent={} rpc_run={} packets={} rma={} collectives={}",
            self.progress_calls,
            self.work_executed,
            self.rpcs_sent,
            self.rpcs_executed,
            self.packets_sent,
            self.rma_ops,
            self.collectives
        )
    }
}
