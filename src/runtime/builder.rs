//! Runtime builder.
//!
//! Configuration precedence, lowest to highest: defaults, TOML file
//! ([`from_toml_file`](RuntimeBuilder::from_toml_file)), `PGASYNC_*`
//! environment variables, then setter calls made on the builder.

use std::sync::Arc;

use crate::diagnostic::{set_fatal_mode, FatalMode};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::inbox::InboxKind;
use crate::persona::{self, tls, Persona};
use crate::runtime::config::{ExecutionMode, RuntimeConfig};
use crate::runtime::env_config::apply_env_overrides;
use crate::runtime::Runtime;
use crate::tracing_compat::info;
use crate::transport::{smp, Transport};

/// Builder for constructing a runtime with custom configuration.
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Defaults overridden by `PGASYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config).context("PGASYNC_* environment overrides")?;
        Ok(Self { config })
    }

    /// Defaults overridden by a TOML file, then by the environment.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use crate::runtime::env_config::{apply_toml_config, parse_toml_file};

        let path = path.as_ref();
        let toml = parse_toml_file(path)?;
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &toml)
            .with_context(|| format!("config file {}", path.display()))?;
        apply_env_overrides(&mut config).context("PGASYNC_* environment overrides")?;
        Ok(Self { config })
    }

    /// Set the execution mode.
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    /// Set the mailbox strategy explicitly.
    #[must_use]
    pub fn inbox(mut self, kind: InboxKind) -> Self {
        self.config.inbox = Some(kind);
        self
    }

    /// Set the user-level progress budget.
    #[must_use]
    pub fn progress_budget(mut self, budget: usize) -> Self {
        self.config.user_progress_budget = budget;
        self
    }

    /// Set the internal-level progress budget.
    #[must_use]
    pub fn internal_progress_budget(mut self, budget: usize) -> Self {
        self.config.internal_progress_budget = budget;
        self
    }

    /// Set the mailbox burst size.
    #[must_use]
    pub fn lpc_burst(mut self, n: usize) -> Self {
        self.config.lpc_burst = n;
        self
    }

    /// Set the handle-callback burst size.
    #[must_use]
    pub fn handle_burst(mut self, n: usize) -> Self {
        self.config.handle_burst = n;
        self
    }

    /// Set the transport poll size.
    #[must_use]
    pub fn packet_burst(mut self, n: usize) -> Self {
        self.config.packet_burst = n;
        self
    }

    /// Set how many empty progress calls precede a thread yield.
    #[must_use]
    pub fn idle_yield_after(mut self, calls: u32) -> Self {
        self.config.idle_yield_after = calls;
        self
    }

    /// Set the shared segment size per rank.
    #[must_use]
    pub fn segment_size(mut self, bytes: usize) -> Self {
        self.config.segment_size = bytes;
        self
    }

    /// Set the barrier radix exponent.
    #[must_use]
    pub fn barrier_radix_log2(mut self, log2: u32) -> Self {
        self.config.barrier_radix_log2 = log2;
        self
    }

    /// Set the in-process fabric's node size (0 = one node).
    #[must_use]
    pub fn ranks_per_node(mut self, n: usize) -> Self {
        self.config.ranks_per_node = n;
        self
    }

    /// Set what fatal usage errors do.
    #[must_use]
    pub fn fatal_mode(mut self, mode: FatalMode) -> Self {
        self.config.fatal_mode = Some(mode);
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Single-threaded preset.
    #[must_use]
    pub fn seq() -> Self {
        Self::new().execution_mode(ExecutionMode::Seq)
    }

    /// Multi-threaded preset.
    #[must_use]
    pub fn par() -> Self {
        Self::new().execution_mode(ExecutionMode::Par)
    }

    /// Initializes the runtime for the transport's rank and binds it to the
    /// calling thread, with the master persona current.
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Runtime> {
        let mut config = self.config;
        config.normalize();
        if let Some(mode) = config.fatal_mode {
            set_fatal_mode(mode);
        }
        if tls::runtime().is_some() {
            return Err(Error::new(ErrorKind::AlreadyInitialized)
                .with_message("thread is already bound to a runtime"));
        }

        let rank = transport.rank_me();
        let ranks = transport.rank_n();
        if rank >= ranks {
            return Err(Error::new(ErrorKind::RankOutOfRange)
                .with_message(format!("rank {rank} outside a job of {ranks} ranks")));
        }
        let segment = transport.segment(rank).ok_or_else(|| {
            Error::new(ErrorKind::Transport)
                .with_message(format!("transport has no segment for rank {rank}"))
        })?;

        let inbox = config.inbox_kind();
        persona::set_default_inbox_kind(inbox);
        let master = Persona::with_inbox(inbox);
        let mode = config.execution_mode;
        let rt = Runtime::assemble(config, transport, segment, master.clone());

        tls::push(&master);
        tls::set_master_scope(Some(master.id()));
        tls::bind_runtime(&rt);
        info!(
            rank,
            ranks,
            mode = %mode,
            inbox = %inbox,
            master = %master.id(),
            "runtime initialized"
        );
        Ok(rt)
    }

    /// Runs `f` on `ranks` in-process ranks configured by this builder. See
    /// [`smp::launch`].
    pub fn launch_smp<F, R>(self, ranks: usize, f: F) -> Vec<R>
    where
        F: Fn(&Runtime) -> R + Sync,
        R: Send,
    {
        smp::launch(ranks, self.config, f)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{env_lock, init_test_logging, test_config};
    use crate::transport::smp::Fabric;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn build_binds_thread_and_master() {
        init_test("build_binds_thread_and_master");
        let fabric = Fabric::new(1, 0, 4096);
        let rt = RuntimeBuilder::from_config(test_config())
            .build(Arc::new(fabric.transport(0)))
            .expect("build");
        crate::assert_with_log!(rt.rank_n() == 1, "rank_n", 1, rt.rank_n());
        assert!(rt.master_persona().active_with_caller());
        assert_eq!(crate::persona::current_persona(), *rt.master_persona());
        assert_eq!(Runtime::current().rank_me(), 0);
        rt.finalize();
        crate::test_complete!("build_binds_thread_and_master");
    }

    #[test]
    fn second_build_on_thread_fails() {
        init_test("second_build_on_thread_fails");
        let fabric = Fabric::new(2, 0, 4096);
        let rt = RuntimeBuilder::from_config(test_config())
            .build(Arc::new(fabric.transport(0)))
            .expect("build");
        let err = RuntimeBuilder::from_config(test_config())
            .build(Arc::new(fabric.transport(1)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);
        drop(rt);
        tls::unbind_runtime();
        crate::test_complete!("second_build_on_thread_fails");
    }

    #[test]
    fn rank_outside_job_is_rejected() {
        init_test("rank_outside_job_is_rejected");
        let fabric = Fabric::new(2, 0, 4096);
        let err = RuntimeBuilder::from_config(test_config())
            .build(Arc::new(fabric.transport(3)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RankOutOfRange);
        assert!(Runtime::try_current().is_none());
        crate::test_complete!("rank_outside_job_is_rejected");
    }

    #[test]
    fn setters_override_config() {
        init_test("setters_override_config");
        let builder = RuntimeBuilder::seq()
            .progress_budget(7)
            .lpc_burst(3)
            .barrier_radix_log2(2)
            .ranks_per_node(4)
            .inbox(InboxKind::Sharded)
            .fatal_mode(FatalMode::Panic);
        let config = builder.config();
        assert_eq!(config.execution_mode, ExecutionMode::Seq);
        assert_eq!(config.user_progress_budget, 7);
        assert_eq!(config.lpc_burst, 3);
        assert_eq!(config.barrier_radix(), 4);
        assert_eq!(config.ranks_per_node, 4);
        assert_eq!(config.inbox_kind(), InboxKind::Sharded);
        assert_eq!(config.fatal_mode, Some(FatalMode::Panic));
        crate::test_complete!("setters_override_config");
    }

    #[test]
    fn from_env_then_setters() {
        init_test("from_env_then_setters");
        let _guard = env_lock();
        std::env::set_var(crate::runtime::env_config::ENV_LPC_BURST, "9");
        std::env::set_var(crate::runtime::env_config::ENV_SEGMENT_SIZE, "2048");
        let builder = RuntimeBuilder::from_env().map(|b| b.segment_size(8192));
        std::env::remove_var(crate::runtime::env_config::ENV_LPC_BURST);
        std::env::remove_var(crate::runtime::env_config::ENV_SEGMENT_SIZE);
        let builder = builder.expect("env config parses");
        assert_eq!(builder.config().lpc_burst, 9);
        assert_eq!(builder.config().segment_size, 8192);
        crate::test_complete!("from_env_then_setters");
    }

    #[test]
    fn bad_env_value_names_its_origin() {
        init_test("bad_env_value_names_its_origin");
        let _guard = env_lock();
        std::env::set_var(crate::runtime::env_config::ENV_LPC_BURST, "lots");
        let result = RuntimeBuilder::from_env();
        std::env::remove_var(crate::runtime::env_config::ENV_LPC_BURST);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        let message = err.message().unwrap_or_default();
        crate::assert_with_log!(
            message.starts_with("PGASYNC_* environment overrides: "),
            "origin prefixed",
            "PGASYNC_* environment overrides: ...",
            message
        );
        assert!(message.contains("PGASYNC_LPC_BURST"));
        crate::test_complete!("bad_env_value_names_its_origin");
    }

    #[test]
    fn launch_smp_runs_every_rank() {
        init_test("launch_smp_runs_every_rank");
        let ranks = RuntimeBuilder::from_config(test_config())
            .launch_smp(4, |rt| rt.rank_n() * 10 + rt.rank_me());
        assert_eq!(ranks, vec![40, 41, 42, 43]);
        crate::test_complete!("launch_smp_runs_every_rank");
    }
}
