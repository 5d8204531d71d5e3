//! pgasync: a partitioned global address space runtime.
//!
//! # Overview
//!
//! A fixed set of cooperating ranks share the illusion of one global memory
//! space. Each rank can run procedures on any other rank, read and write any
//! rank's shared segment with one-sided transfers, and join collective
//! operations over teams of ranks. Everything asynchronous completes through
//! futures.
//!
//! There is no runtime thread. Deferred work (RPC bodies, continuations,
//! completion callbacks, collective signalling) sits in persona mailboxes
//! until a thread holding that persona calls [`progress`], directly or while
//! blocked in [`Future::wait`].
//!
//! # Core guarantees
//!
//! - **Single fulfilment**: a promise completes once; a ready future never
//!   changes.
//! - **No inline continuations**: [`Future::then`] queues the continuation
//!   on the calling persona instead of running it in the completing frame.
//! - **Per-pair ordering**: messages from one rank to another run in issue
//!   order.
//! - **Fatal usage errors**: misuse is reported with rank and source
//!   location, then ends the job (see [`diagnostic`]).
//!
//! # Module structure
//!
//! - [`future`]: futures, promises, `when_all`
//! - [`inbox`]: per-persona mailboxes with burst draining
//! - [`persona`]: execution contexts and the per-thread persona stack
//! - [`runtime`]: lifecycle, configuration, the progress engine
//! - [`transport`]: the network seam and the in-process `smp` fabric
//! - [`team`], [`collectives`]: teams, barrier, broadcast, reductions
//! - [`dist_object`]: per-rank values under a team-wide name
//! - [`memory`]: global pointers, the segment allocator, put/get with
//!   completion requests, atomic domains
//! - [`observability`]: runtime counters
//! - [`error`], [`diagnostic`]: recoverable errors and fatal usage errors
//!
//! # Example
//!
//! ```ignore
//! use pgasync::{smp, RuntimeConfig};
//!
//! let sums = smp::launch(4, RuntimeConfig::default(), |rt| {
//!     let answer = rt.rpc((rt.rank_me() + 1) % rt.rank_n(), |x: i32| x + 1, 41);
//!     assert_eq!(answer.wait(), 42);
//!     rt.reduce_all(rt.rank_me(), |a, b| a + b).wait()
//! });
//! assert_eq!(sums, vec![6; 4]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod collectives;
pub mod diagnostic;
pub mod dist_object;
pub mod error;
pub mod future;
pub mod inbox;
pub mod memory;
pub mod observability;
pub mod persona;
pub mod rpc;
pub mod runtime;
pub mod team;
pub mod tracing_compat;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

/// Identity of a rank: an index in `0..rank_n`.
pub type Rank = usize;

pub use collectives::CollectiveId;
pub use diagnostic::{set_fatal_mode, FatalMode};
pub use dist_object::DistObject;
pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind, Recoverability, Result, ResultExt};
pub use future::{
    make_future, wait, when_all, when_all3, when_all4, when_all5, when_all_vec, Future, Promise,
    Resolve, Value,
};
pub use inbox::{InboxKind, ProgressLevel};
pub use memory::{
    AtomicDomain, AtomicOp, AtomicValue, GlobalPtr, MemoryKind, OperationCx, PutCompletions,
    RemoteCx,
};
pub use observability::StatsSnapshot;
pub use persona::{current_persona, default_persona, persona_flush, Persona, PersonaScope};
pub use runtime::{ExecutionMode, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeGuard};
pub use team::{Team, TeamId};
pub use transport::smp;

/// This rank, from the runtime bound to the calling thread.
#[must_use]
#[track_caller]
pub fn rank_me() -> Rank {
    Runtime::current().rank_me()
}

/// Number of ranks, from the runtime bound to the calling thread.
#[must_use]
#[track_caller]
pub fn rank_n() -> usize {
    Runtime::current().rank_n()
}

/// Makes progress on the calling thread's active personas.
pub fn progress(level: ProgressLevel) -> usize {
    runtime::progress(level)
}
