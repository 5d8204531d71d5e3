//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `execution_mode` | `Par` |
//! | `inbox` | `None` (chosen by execution mode) |
//! | `user_progress_budget` | 1000 |
//! | `internal_progress_budget` | 100 |
//! | `lpc_burst` | 100 |
//! | `handle_burst` | 4 |
//! | `packet_burst` | 100 |
//! | `idle_yield_after` | 10 |
//! | `segment_size` | 1 MiB |
//! | `barrier_radix_log2` | 4 |
//! | `ranks_per_node` | 0 (every rank on one node) |
//! | `fatal_mode` | `None` (keep the process-wide mode) |

use std::fmt;

use crate::diagnostic::FatalMode;
use crate::inbox::InboxKind;

/// Default shared segment size per rank.
pub const DEFAULT_SEGMENT_SIZE: usize = 1024 * 1024;

/// Largest accepted barrier radix exponent.
pub const MAX_BARRIER_RADIX_LOG2: u32 = 8;

/// Threading discipline of a runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Only the initializing thread touches the runtime.
    Seq,
    /// Any number of application threads may enqueue work and make progress.
    #[default]
    Par,
}

impl ExecutionMode {
    /// Parses `seq`/`par` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "seq" | "sequential" => Some(Self::Seq),
            "par" | "parallel" => Some(Self::Par),
            _ => None,
        }
    }

    /// Mailbox strategy used when none is configured explicitly.
    #[must_use]
    pub const fn default_inbox(self) -> InboxKind {
        match self {
            Self::Seq => InboxKind::LockFree,
            Self::Par => InboxKind::Sharded,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seq => f.write_str("seq"),
            Self::Par => f.write_str("par"),
        }
    }
}

/// Bounds on the work a single progress call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBudgets {
    /// Work items after which a user-level progress call stops looping.
    pub user: usize,
    /// Work items after which an internal-level progress call stops looping.
    pub internal: usize,
    /// Items drained from one mailbox per burst.
    pub lpc_burst: usize,
    /// Network-completion callbacks examined per burst.
    pub handle_burst: usize,
    /// Packets taken from the transport per poll.
    pub packet_burst: usize,
    /// Consecutive empty progress calls before yielding the thread.
    pub idle_yield_after: u32,
}

impl Default for ProgressBudgets {
    fn default() -> Self {
        RuntimeConfig::default().budgets()
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Threading discipline.
    pub execution_mode: ExecutionMode,
    /// Mailbox strategy; `None` picks the one matching `execution_mode`.
    pub inbox: Option<InboxKind>,
    /// Budget for user-level progress calls.
    pub user_progress_budget: usize,
    /// Budget for internal-level progress calls.
    pub internal_progress_budget: usize,
    /// Mailbox items per burst.
    pub lpc_burst: usize,
    /// Handle callbacks per burst.
    pub handle_burst: usize,
    /// Transport packets per poll.
    pub packet_burst: usize,
    /// Empty progress calls before a thread yield.
    pub idle_yield_after: u32,
    /// Shared segment bytes per rank.
    pub segment_size: usize,
    /// Barrier tree radix, as a power of two.
    pub barrier_radix_log2: u32,
    /// Ranks grouped per node by the in-process fabric (0 = all).
    pub ranks_per_node: usize,
    /// What usage errors do after reporting; `None` keeps the process-wide
    /// setting (initially [`FatalMode::Abort`]).
    pub fatal_mode: Option<FatalMode>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.user_progress_budget == 0 {
            self.user_progress_budget = 1;
        }
        if self.internal_progress_budget == 0 {
            self.internal_progress_budget = 1;
        }
        if self.lpc_burst == 0 {
            self.lpc_burst = 1;
        }
        if self.handle_burst == 0 {
            self.handle_burst = 1;
        }
        if self.packet_burst == 0 {
            self.packet_burst = 1;
        }
        if self.idle_yield_after == 0 {
            self.idle_yield_after = 1;
        }
        if self.segment_size == 0 {
            self.segment_size = DEFAULT_SEGMENT_SIZE;
        }
        self.barrier_radix_log2 = self.barrier_radix_log2.clamp(1, MAX_BARRIER_RADIX_LOG2);
    }

    /// The mailbox strategy in effect.
    #[must_use]
    pub fn inbox_kind(&self) -> InboxKind {
        self.inbox
            .unwrap_or_else(|| self.execution_mode.default_inbox())
    }

    /// The progress bounds in effect.
    #[must_use]
    pub const fn budgets(&self) -> ProgressBudgets {
        ProgressBudgets {
            user: self.user_progress_budget,
            internal: self.internal_progress_budget,
            lpc_burst: self.lpc_burst,
            handle_burst: self.handle_burst,
            packet_burst: self.packet_burst,
            idle_yield_after: self.idle_yield_after,
        }
    }

    /// Barrier tree radix.
    #[must_use]
    pub const fn barrier_radix(&self) -> usize {
        1 << self.barrier_radix_log2
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Par,
            inbox: None,
            user_progress_budget: 1000,
            internal_progress_budget: 100,
            lpc_burst: 100,
            handle_burst: 4,
            packet_burst: 100,
            idle_yield_after: 10,
            segment_size: DEFAULT_SEGMENT_SIZE,
            barrier_radix_log2: 4,
            ranks_per_node: 0,
            fatal_mode: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = RuntimeConfig::default();
        crate::assert_with_log!(
            config.execution_mode == ExecutionMode::Par,
            "execution_mode",
            ExecutionMode::Par,
            config.execution_mode
        );
        crate::assert_with_log!(
            config.user_progress_budget == 1000,
            "user_progress_budget",
            1000,
            config.user_progress_budget
        );
        crate::assert_with_log!(
            config.segment_size == DEFAULT_SEGMENT_SIZE,
            "segment_size",
            DEFAULT_SEGMENT_SIZE,
            config.segment_size
        );
        crate::assert_with_log!(
            config.barrier_radix() == 16,
            "barrier_radix",
            16,
            config.barrier_radix()
        );
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_normalize_fixes_zero_values() {
        init_test("test_normalize_fixes_zero_values");
        let mut config = RuntimeConfig {
            user_progress_budget: 0,
            internal_progress_budget: 0,
            lpc_burst: 0,
            handle_burst: 0,
            packet_burst: 0,
            idle_yield_after: 0,
            segment_size: 0,
            barrier_radix_log2: 0,
            ..RuntimeConfig::default()
        };
        config.normalize();
        assert_eq!(config.user_progress_budget, 1);
        assert_eq!(config.internal_progress_budget, 1);
        assert_eq!(config.lpc_burst, 1);
        assert_eq!(config.handle_burst, 1);
        assert_eq!(config.packet_burst, 1);
        assert_eq!(config.idle_yield_after, 1);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
        assert_eq!(config.barrier_radix_log2, 1);
        crate::test_complete!("test_normalize_fixes_zero_values");
    }

    #[test]
    fn test_radix_is_clamped() {
        init_test("test_radix_is_clamped");
        let mut config = RuntimeConfig {
            barrier_radix_log2: 40,
            ..RuntimeConfig::default()
        };
        config.normalize();
        assert_eq!(config.barrier_radix_log2, MAX_BARRIER_RADIX_LOG2);
        crate::test_complete!("test_radix_is_clamped");
    }

    #[test]
    fn test_inbox_follows_execution_mode() {
        init_test("test_inbox_follows_execution_mode");
        let seq = RuntimeConfig {
            execution_mode: ExecutionMode::Seq,
            ..RuntimeConfig::default()
        };
        assert_eq!(seq.inbox_kind(), InboxKind::LockFree);
        assert_eq!(RuntimeConfig::default().inbox_kind(), InboxKind::Sharded);

        let explicit = RuntimeConfig {
            execution_mode: ExecutionMode::Seq,
            inbox: Some(InboxKind::Sharded),
            ..RuntimeConfig::default()
        };
        assert_eq!(explicit.inbox_kind(), InboxKind::Sharded);
        crate::test_complete!("test_inbox_follows_execution_mode");
    }

    #[test]
    fn test_execution_mode_parse() {
        init_test("test_execution_mode_parse");
        assert_eq!(ExecutionMode::parse("SEQ"), Some(ExecutionMode::Seq));
        assert_eq!(ExecutionMode::parse(" parallel "), Some(ExecutionMode::Par));
        assert_eq!(ExecutionMode::parse("threads"), None);
        assert_eq!(ExecutionMode::Par.to_string(), "par");
        crate::test_complete!("test_execution_mode_parse");
    }
}
