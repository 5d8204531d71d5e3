//! Runtime lifecycle and process context.
//!
//! A [`Runtime`] is the explicit context of one rank: its identity, the
//! transport endpoint it talks through, its shared segment, the master
//! persona, the world and local teams, and the registries where collective
//! and distributed-object state waits for matching messages.
//!
//! # Lifecycle
//!
//! [`RuntimeBuilder::build`] is `init()`: it binds the calling thread to the
//! runtime and makes the master persona current there. [`Runtime::finalize`]
//! ends the bracket with a closing world barrier. Between the two, the
//! runtime is reachable from any bound thread through [`Runtime::current`].
//!
//! ```ignore
//! let rt = Runtime::builder().build(Arc::new(transport))?;
//! let sum = rt.reduce_all(rt.rank_me(), |a, b| a + b).wait();
//! rt.finalize();
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod progress;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use std::collections::HashMap;

pub use builder::RuntimeBuilder;
pub use config::{ExecutionMode, ProgressBudgets, RuntimeConfig};
pub use progress::progress;

use crate::collectives::Registry;
use crate::diagnostic::fatal;
use crate::error::{Error, ErrorContext, ErrorKind, Result};
use crate::inbox::ProgressLevel;
use crate::memory::Segment;
use crate::observability::{RuntimeStats, StatsSnapshot};
use crate::persona::{tls, Persona};
use crate::team::{Team, TeamId};
use crate::tracing_compat::{debug, info, trace, warn};
use crate::transport::{Command, Packet, Recipient, Transport};
use crate::Rank;

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    transport: Arc<dyn Transport>,
    segment: Arc<Segment>,
    master: Persona,
    world: Team,
    local_team: Team,
    teams: Mutex<HashMap<TeamId, Team>>,
    collectives: Registry,
    dist_objects: Registry,
    stats: RuntimeStats,
    finalized: AtomicBool,
    /// Held across poll and deliver so mailbox order matches arrival order.
    poll_lock: Mutex<()>,
}

/// Handle on one rank's runtime. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Keeps a thread bound to a runtime; unbinds on drop.
#[must_use = "the thread is unbound when the guard is dropped"]
pub struct RuntimeGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        tls::unbind_runtime();
    }
}

impl fmt::Debug for RuntimeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuntimeGuard")
    }
}

impl Runtime {
    /// Starts building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn assemble(
        config: RuntimeConfig,
        transport: Arc<dyn Transport>,
        segment: Arc<Segment>,
        master: Persona,
    ) -> Self {
        let rank_me = transport.rank_me();
        let rank_n = transport.rank_n();
        let local_ranks: Vec<Rank> = (0..rank_n).filter(|&r| transport.is_local(r)).collect();
        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let world = Team::new(TeamId::WORLD, (0..rank_n).collect(), rank_me, weak.clone());
            let local_team = Team::new(
                TeamId::local(local_ranks.first().copied().unwrap_or(rank_me)),
                local_ranks,
                rank_me,
                weak.clone(),
            );
            let teams = [world.clone(), local_team.clone()]
                .into_iter()
                .map(|team| (team.id(), team))
                .collect();
            RuntimeInner {
                config,
                transport,
                segment,
                master,
                world,
                local_team,
                teams: Mutex::new(teams),
                collectives: Registry::default(),
                dist_objects: Registry::default(),
                stats: RuntimeStats::new(),
                finalized: AtomicBool::new(false),
                poll_lock: Mutex::new(()),
            }
        });
        Self { inner }
    }

    /// The runtime bound to the calling thread.
    ///
    /// Calling this outside the init/finalize bracket is a usage error.
    #[must_use]
    #[track_caller]
    pub fn current() -> Self {
        tls::runtime().unwrap_or_else(|| {
            fatal("no runtime is bound to this thread (call outside init/finalize)")
        })
    }

    /// The runtime bound to the calling thread, if any.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        tls::runtime()
    }

    /// This rank.
    #[must_use]
    pub fn rank_me(&self) -> Rank {
        self.inner.transport.rank_me()
    }

    /// Number of ranks in the job.
    #[must_use]
    pub fn rank_n(&self) -> usize {
        self.inner.transport.rank_n()
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Current values of the runtime counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// The persona that receives incoming RPCs and collective traffic.
    #[must_use]
    pub fn master_persona(&self) -> &Persona {
        &self.inner.master
    }

    /// The team of every rank.
    #[must_use]
    pub fn world(&self) -> &Team {
        &self.inner.world
    }

    /// The team of ranks sharing memory with this one.
    #[must_use]
    pub fn local_team(&self) -> &Team {
        &self.inner.local_team
    }

    /// The transport endpoint.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// This rank's shared segment.
    #[must_use]
    pub fn segment(&self) -> &Arc<Segment> {
        &self.inner.segment
    }

    /// Returns true if `rank` shares memory with this rank.
    #[must_use]
    pub fn is_local(&self, rank: Rank) -> bool {
        self.inner.transport.is_local(rank)
    }

    /// Binds the calling thread to this runtime so it may issue operations
    /// and make progress. Only allowed in [`ExecutionMode::Par`].
    pub fn enter(&self) -> Result<RuntimeGuard> {
        self.ensure_live()?;
        if self.inner.config.execution_mode == ExecutionMode::Seq {
            return Err(self.error(ErrorKind::ExecutionMode)
                .with_message("seq mode runtimes may only be used by the initializing thread"));
        }
        if !tls::bind_runtime(self) {
            return Err(self.error(ErrorKind::AlreadyInitialized)
                .with_message("thread is already bound to a runtime"));
        }
        debug!(rank = self.rank_me(), "thread entered runtime");
        Ok(RuntimeGuard {
            _not_send: std::marker::PhantomData,
        })
    }

    /// Pops the master persona scope pushed at init so another thread may
    /// activate the master persona.
    #[track_caller]
    pub fn liberate_master_persona(&self) {
        let master = self.inner.master.id();
        if tls::master_scope() != Some(master) {
            fatal("liberate_master_persona called by a thread not holding the initial master scope");
        }
        tls::pop(master);
        tls::set_master_scope(None);
        info!(rank = self.rank_me(), "master persona liberated");
    }

    /// Ends the init/finalize bracket: waits for every rank at a world
    /// barrier (activating the master persona for it if no thread holds
    /// it), releases the master scope if still held and unbinds the
    /// calling thread.
    #[track_caller]
    pub fn finalize(&self) {
        if self.is_finalized() {
            fatal("runtime finalized twice");
        }
        let master = &self.inner.master;
        let scope = (!master.is_active()).then(|| master.activate());
        self.inner.world.barrier_async().wait();
        drop(scope);
        self.inner.finalized.store(true, Ordering::Release);
        let master = self.inner.master.id();
        if tls::master_scope() == Some(master) {
            tls::pop(master);
            tls::set_master_scope(None);
        }
        tls::unbind_runtime();
        info!(rank = self.rank_me(), stats = %self.stats(), "runtime finalized");
    }

    /// Returns true once [`finalize`](Self::finalize) has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    /// Makes progress on the calling thread. See [`progress`].
    pub fn progress(&self, level: ProgressLevel) -> usize {
        progress(level)
    }

    /// An error of `kind` observed on this rank.
    pub(crate) fn error(&self, kind: ErrorKind) -> Error {
        Error::new(kind).with_context(ErrorContext::on_rank(self.rank_me()))
    }

    /// Fails with [`ErrorKind::Finalized`] once the bracket has closed.
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(self.error(ErrorKind::Finalized).with_message("runtime already finalized"));
        }
        Ok(())
    }

    pub(crate) fn metrics(&self) -> &RuntimeStats {
        &self.inner.stats
    }

    pub(crate) fn collectives(&self) -> &Registry {
        &self.inner.collectives
    }

    pub(crate) fn dist_objects(&self) -> &Registry {
        &self.inner.dist_objects
    }

    /// The segment of a rank sharing memory with this one.
    #[track_caller]
    pub(crate) fn local_segment_of(&self, rank: Rank) -> Arc<Segment> {
        self.inner
            .transport
            .segment(rank)
            .unwrap_or_else(|| fatal(format!("rank {rank} does not share memory with rank {}", self.rank_me())))
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<RuntimeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn register_team(&self, team: &Team) {
        self.inner.teams.lock().insert(team.id(), team.clone());
    }

    #[track_caller]
    pub(crate) fn team(&self, id: TeamId) -> Team {
        let found = self.inner.teams.lock().get(&id).cloned();
        found.unwrap_or_else(|| fatal(format!("unknown team {id} on rank {}", self.rank_me())))
    }

    /// Sends an active message. Out-of-range ranks, use after finalize and
    /// transport rejection are fatal.
    #[track_caller]
    pub(crate) fn send(&self, dest: Rank, recipient: Recipient, level: ProgressLevel, command: Command) {
        if self.is_finalized() {
            fatal("communication after finalize");
        }
        let rank_n = self.rank_n();
        if dest >= rank_n {
            fatal(format!("destination rank {dest} out of range (rank_n = {rank_n})"));
        }
        let packet = Packet {
            source: self.rank_me(),
            recipient,
            level,
            command,
        };
        if let Err(e) = self.inner.transport.send(dest, packet) {
            fatal(format!("send to rank {dest} failed: {e}"));
        }
        self.inner.stats.packets_sent.increment();
        trace!(from = self.rank_me(), to = dest, ?recipient, ?level, "packet sent");
    }

    /// Drains up to `max_n` packets into persona mailboxes. Only one thread
    /// per rank polls at a time; a thread that finds the transport busy
    /// skips polling this round and returns 0.
    pub(crate) fn poll_transport(&self, max_n: usize) -> usize {
        let Some(_polling) = self.inner.poll_lock.try_lock() else {
            return 0;
        };
        match self.inner.transport.poll(max_n, &mut |packet| self.deliver(packet)) {
            Ok(n) => n,
            Err(e) => fatal(format!("transport poll failed: {e}")),
        }
    }

    fn deliver(&self, packet: Packet) {
        let persona = match packet.recipient {
            Recipient::Master => Some(self.inner.master.clone()),
            Recipient::Persona(id) => Persona::lookup(id),
        };
        let Some(persona) = persona else {
            warn!(
                rank = self.rank_me(),
                source = packet.source,
                recipient = ?packet.recipient,
                "dropping packet for a persona that no longer exists"
            );
            return;
        };
        let weak = self.downgrade();
        let command = packet.command;
        persona.enqueue(
            packet.level,
            Box::new(move || {
                if let Some(rt) = Self::from_weak(&weak) {
                    command(&rt);
                }
            }),
        );
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("rank_me", &self.rank_me())
            .field("rank_n", &self.rank_n())
            .field("execution_mode", &self.inner.config.execution_mode)
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

/// The calling thread's rank, if it is bound to a runtime. Used by
/// diagnostics, so it never fails.
pub(crate) fn current_rank() -> Option<Rank> {
    tls::try_runtime().map(|rt| rt.rank_me())
}
