//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`segment_size(..)`)
//! 2. **Environment variables**: values from `PGASYNC_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `PGASYNC_EXECUTION_MODE` | `seq`/`par` | `execution_mode` |
//! | `PGASYNC_INBOX` | `sharded`/`lockfree` | `inbox` |
//! | `PGASYNC_PROGRESS_BUDGET` | `usize` | `user_progress_budget` |
//! | `PGASYNC_INTERNAL_PROGRESS_BUDGET` | `usize` | `internal_progress_budget` |
//! | `PGASYNC_LPC_BURST` | `usize` | `lpc_burst` |
//! | `PGASYNC_HANDLE_BURST` | `usize` | `handle_burst` |
//! | `PGASYNC_PACKET_BURST` | `usize` | `packet_burst` |
//! | `PGASYNC_IDLE_YIELD_AFTER` | `u32` | `idle_yield_after` |
//! | `PGASYNC_SEGMENT_SIZE` | `usize` | `segment_size` |
//! | `PGASYNC_BARRIER_RADIX_LOG2` | `u32` | `barrier_radix_log2` |
//! | `PGASYNC_RANKS_PER_NODE` | `usize` | `ranks_per_node` |
//! | `PGASYNC_FATAL_MODE` | `abort`/`panic` | `fatal_mode` |

use crate::diagnostic::FatalMode;
use crate::error::{Error, Result};
use crate::inbox::InboxKind;
use crate::runtime::config::{ExecutionMode, RuntimeConfig};

/// Environment variable name for the execution mode.
pub const ENV_EXECUTION_MODE: &str = "PGASYNC_EXECUTION_MODE";
/// Environment variable name for the mailbox strategy.
pub const ENV_INBOX: &str = "PGASYNC_INBOX";
/// Environment variable name for the user-level progress budget.
pub const ENV_PROGRESS_BUDGET: &str = "PGASYNC_PROGRESS_BUDGET";
/// Environment variable name for the internal-level progress budget.
pub const ENV_INTERNAL_PROGRESS_BUDGET: &str = "PGASYNC_INTERNAL_PROGRESS_BUDGET";
/// Environment variable name for mailbox items per burst.
pub const ENV_LPC_BURST: &str = "PGASYNC_LPC_BURST";
/// Environment variable name for handle callbacks per burst.
pub const ENV_HANDLE_BURST: &str = "PGASYNC_HANDLE_BURST";
/// Environment variable name for transport packets per poll.
pub const ENV_PACKET_BURST: &str = "PGASYNC_PACKET_BURST";
/// Environment variable name for the idle streak before a thread yield.
pub const ENV_IDLE_YIELD_AFTER: &str = "PGASYNC_IDLE_YIELD_AFTER";
/// Environment variable name for the per-rank segment size in bytes.
pub const ENV_SEGMENT_SIZE: &str = "PGASYNC_SEGMENT_SIZE";
/// Environment variable name for the barrier radix exponent.
pub const ENV_BARRIER_RADIX_LOG2: &str = "PGASYNC_BARRIER_RADIX_LOG2";
/// Environment variable name for the in-process fabric node size.
pub const ENV_RANKS_PER_NODE: &str = "PGASYNC_RANKS_PER_NODE";
/// Environment variable name for the fatal diagnostic mode.
pub const ENV_FATAL_MODE: &str = "PGASYNC_FATAL_MODE";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_EXECUTION_MODE) {
        config.execution_mode = parse_execution_mode(ENV_EXECUTION_MODE, &val)?;
    }
    if let Some(val) = read_env(ENV_INBOX) {
        config.inbox = Some(parse_inbox(ENV_INBOX, &val)?);
    }
    if let Some(val) = read_env(ENV_PROGRESS_BUDGET) {
        config.user_progress_budget = parse_usize(ENV_PROGRESS_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_INTERNAL_PROGRESS_BUDGET) {
        config.internal_progress_budget = parse_usize(ENV_INTERNAL_PROGRESS_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_LPC_BURST) {
        config.lpc_burst = parse_usize(ENV_LPC_BURST, &val)?;
    }
    if let Some(val) = read_env(ENV_HANDLE_BURST) {
        config.handle_burst = parse_usize(ENV_HANDLE_BURST, &val)?;
    }
    if let Some(val) = read_env(ENV_PACKET_BURST) {
        config.packet_burst = parse_usize(ENV_PACKET_BURST, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_YIELD_AFTER) {
        config.idle_yield_after = parse_u32(ENV_IDLE_YIELD_AFTER, &val)?;
    }
    if let Some(val) = read_env(ENV_SEGMENT_SIZE) {
        config.segment_size = parse_usize(ENV_SEGMENT_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_BARRIER_RADIX_LOG2) {
        config.barrier_radix_log2 = parse_u32(ENV_BARRIER_RADIX_LOG2, &val)?;
    }
    if let Some(val) = read_env(ENV_RANKS_PER_NODE) {
        config.ranks_per_node = parse_usize(ENV_RANKS_PER_NODE, &val)?;
    }
    if let Some(val) = read_env(ENV_FATAL_MODE) {
        config.fatal_mode = Some(parse_fatal_mode(ENV_FATAL_MODE, &val)?);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32> {
    val.trim().parse::<u32>().map_err(|e| {
        Error::config(format!(
            "invalid value for {var_name}: expected u32, got {val:?} ({e})"
        ))
    })
}

fn parse_execution_mode(var_name: &str, val: &str) -> Result<ExecutionMode> {
    ExecutionMode::parse(val).ok_or_else(|| {
        Error::config(format!(
            "invalid value for {var_name}: expected seq or par, got {val:?}"
        ))
    })
}

fn parse_inbox(var_name: &str, val: &str) -> Result<InboxKind> {
    InboxKind::parse(val).ok_or_else(|| {
        Error::config(format!(
            "invalid value for {var_name}: expected sharded or lockfree, got {val:?}"
        ))
    })
}

fn parse_fatal_mode(var_name: &str, val: &str) -> Result<FatalMode> {
    match val.trim().to_lowercase().as_str() {
        "abort" => Ok(FatalMode::Abort),
        "panic" => Ok(FatalMode::Panic),
        _ => Err(Error::config(format!(
            "invalid value for {var_name}: expected abort or panic, got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// Fields are grouped into TOML tables:
///
/// ```toml
/// [runtime]
/// execution_mode = "par"
/// inbox = "sharded"
/// barrier_radix_log2 = 4
/// ranks_per_node = 0
/// fatal_mode = "abort"
///
/// [progress]
/// user_budget = 1000
/// internal_budget = 100
/// lpc_burst = 100
/// handle_burst = 4
/// packet_burst = 100
/// idle_yield_after = 10
///
/// [memory]
/// segment_size = 1048576
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Runtime-wide settings.
    #[serde(default)]
    pub runtime: RuntimeToml,
    /// Progress engine bounds.
    #[serde(default)]
    pub progress: ProgressToml,
    /// Shared segment settings.
    #[serde(default)]
    pub memory: MemoryToml,
}

/// Runtime section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeToml {
    /// `seq` or `par`.
    pub execution_mode: Option<String>,
    /// `sharded` or `lockfree`.
    pub inbox: Option<String>,
    /// Barrier radix exponent.
    pub barrier_radix_log2: Option<u32>,
    /// Ranks per node for the in-process fabric.
    pub ranks_per_node: Option<usize>,
    /// `abort` or `panic`.
    pub fatal_mode: Option<String>,
}

/// Progress section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ProgressToml {
    /// User-level progress budget.
    pub user_budget: Option<usize>,
    /// Internal-level progress budget.
    pub internal_budget: Option<usize>,
    /// Mailbox items per burst.
    pub lpc_burst: Option<usize>,
    /// Handle callbacks per burst.
    pub handle_burst: Option<usize>,
    /// Transport packets per poll.
    pub packet_burst: Option<usize>,
    /// Empty progress calls before a thread yield.
    pub idle_yield_after: Option<u32>,
}

/// Memory section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct MemoryToml {
    /// Shared segment bytes per rank.
    pub segment_size: Option<usize>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) -> Result<()> {
    if let Some(ref v) = toml.runtime.execution_mode {
        config.execution_mode = parse_execution_mode("runtime.execution_mode", v)?;
    }
    if let Some(ref v) = toml.runtime.inbox {
        config.inbox = Some(parse_inbox("runtime.inbox", v)?);
    }
    if let Some(v) = toml.runtime.barrier_radix_log2 {
        config.barrier_radix_log2 = v;
    }
    if let Some(v) = toml.runtime.ranks_per_node {
        config.ranks_per_node = v;
    }
    if let Some(ref v) = toml.runtime.fatal_mode {
        config.fatal_mode = Some(parse_fatal_mode("runtime.fatal_mode", v)?);
    }
    if let Some(v) = toml.progress.user_budget {
        config.user_progress_budget = v;
    }
    if let Some(v) = toml.progress.internal_budget {
        config.internal_progress_budget = v;
    }
    if let Some(v) = toml.progress.lpc_burst {
        config.lpc_burst = v;
    }
    if let Some(v) = toml.progress.handle_burst {
        config.handle_burst = v;
    }
    if let Some(v) = toml.progress.packet_burst {
        config.packet_burst = v;
    }
    if let Some(v) = toml.progress.idle_yield_after {
        config.idle_yield_after = v;
    }
    if let Some(v) = toml.memory.segment_size {
        config.segment_size = v;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig> {
    toml::from_str(toml_str).map_err(|e| {
        Error::new(crate::error::ErrorKind::ConfigFile)
            .with_message(format!("failed to parse TOML config: {e}"))
    })
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::new(crate::error::ErrorKind::ConfigFile)
            .with_message(format!("failed to read config file {}", path.display()))
            .with_source(e)
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================


#[cfg(all(test, feature = "config-file"))]
mod toml_tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_toml_full_config() {
        let toml_str = r#"
[runtime]
execution_mode = "seq"
inbox = "lockfree"
barrier_radix_log2 = 2
ranks_per_node = 4
fatal_mode = "panic"

[progress]
user_budget = 10
internal_budget = 5
lpc_burst = 8
handle_burst = 1
packet_burst = 16
idle_yield_after = 3

[memory]
segment_size = 65536
"#;
        let parsed = parse_toml_str(toml_str).unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed).unwrap();
        assert_eq!(config.execution_mode, ExecutionMode::Seq);
        assert_eq!(config.inbox, Some(InboxKind::LockFree));
        assert_eq!(config.barrier_radix_log2, 2);
        assert_eq!(config.ranks_per_node, 4);
        assert_eq!(config.fatal_mode, Some(FatalMode::Panic));
        assert_eq!(config.user_progress_budget, 10);
        assert_eq!(config.internal_progress_budget, 5);
        assert_eq!(config.lpc_burst, 8);
        assert_eq!(config.handle_burst, 1);
        assert_eq!(config.packet_burst, 16);
        assert_eq!(config.idle_yield_after, 3);
        assert_eq!(config.segment_size, 65536);
    }

    #[test]
    fn parse_toml_partial_config() {
        let parsed = parse_toml_str("[memory]\nsegment_size = 4096\n").unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed).unwrap();
        assert_eq!(config.segment_size, 4096);
        assert_eq!(
            config.user_progress_budget,
            RuntimeConfig::default().user_progress_budget
        );
    }

    #[test]
    fn parse_toml_invalid_syntax() {
        let err = parse_toml_str("not valid toml {{{{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigFile);
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn apply_toml_rejects_unknown_mode() {
        let parsed = parse_toml_str("[runtime]\nexecution_mode = \"gpu\"\n").unwrap();
        let mut config = RuntimeConfig::default();
        assert!(apply_toml_config(&mut config, &parsed).is_err());
    }

    #[test]
    fn toml_file_not_found() {
        let err = parse_toml_file(std::path::Path::new("/nonexistent/pgasync.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn toml_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("pgasync-{}.toml", std::process::id()));
        std::fs::write(&path, "[progress]\nlpc_burst = 12\n").unwrap();
        let parsed = parse_toml_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed).unwrap();
        assert_eq!(config.lpc_burst, 12);
    }
}
