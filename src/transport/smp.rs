//! In-process fabric: every rank is a thread of this process.
//!
//! Each rank has a lock-free packet queue that every other rank pushes into,
//! so messages from one sender to one destination stay in order. One-sided
//! transfers are queued on the *initiator* and executed, in issue order, the
//! next time the initiator polls. Ranks are grouped into nodes of
//! `ranks_per_node` consecutive ranks; ranks on the same node read and write
//! each other's segments directly.
//!
//! ```ignore
//! let sums = smp::launch(4, RuntimeConfig::default(), |rt| {
//!     rt.reduce_all(rt.rank_me(), |a, b| a + b).wait()
//! });
//! assert_eq!(sums, vec![6; 4]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use super::{AtomicUpdate, Packet, RmaHandle, Transport, TransportError};
use crate::diagnostic::fatal;
use crate::memory::Segment;
use crate::runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
use crate::tracing_compat::{debug, error};
use crate::Rank;

enum RmaOp {
    Put {
        dest: Rank,
        addr: u64,
        bytes: Vec<u8>,
        handle: RmaHandle,
    },
    Get {
        src: Rank,
        addr: u64,
        len: usize,
        handle: RmaHandle,
    },
    Atomic {
        dest: Rank,
        addr: u64,
        len: usize,
        update: AtomicUpdate,
        handle: RmaHandle,
    },
}

/// Shared state of an in-process job.
pub struct Fabric {
    ranks: usize,
    ranks_per_node: usize,
    inboxes: Vec<SegQueue<Packet>>,
    rma: Vec<SegQueue<RmaOp>>,
    segments: Vec<Arc<Segment>>,
    failed: AtomicBool,
    first_failure: Mutex<Option<Rank>>,
}

impl Fabric {
    /// Creates a fabric for `ranks` ranks with `segment_size` bytes of
    /// shared segment each. `ranks_per_node == 0` puts every rank on one
    /// node.
    #[must_use]
    pub fn new(ranks: usize, ranks_per_node: usize, segment_size: usize) -> Arc<Self> {
        Arc::new(Self {
            ranks,
            ranks_per_node,
            inboxes: (0..ranks).map(|_| SegQueue::new()).collect(),
            rma: (0..ranks).map(|_| SegQueue::new()).collect(),
            segments: (0..ranks)
                .map(|rank| Arc::new(Segment::new(rank, segment_size)))
                .collect(),
            failed: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        })
    }

    /// Number of ranks.
    #[must_use]
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    /// The node a rank belongs to.
    #[must_use]
    pub fn node_of(&self, rank: Rank) -> usize {
        if self.ranks_per_node == 0 {
            0
        } else {
            rank / self.ranks_per_node
        }
    }

    /// The endpoint of `rank`.
    #[must_use]
    pub fn transport(self: &Arc<Self>, rank: Rank) -> SmpTransport {
        SmpTransport {
            fabric: Arc::clone(self),
            rank,
        }
    }

    /// Marks the job as failed; every rank's next poll reports it.
    pub fn fail(&self, rank: Rank) {
        self.first_failure.lock().get_or_insert(rank);
        self.failed.store(true, Ordering::Release);
    }

    /// Returns true once any rank has failed.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn check_rank(&self, rank: Rank) -> Result<(), TransportError> {
        if rank < self.ranks {
            Ok(())
        } else {
            Err(TransportError::RankOutOfRange {
                rank,
                ranks: self.ranks,
            })
        }
    }

    fn run_rma(&self, op: RmaOp) -> Result<(), TransportError> {
        match op {
            RmaOp::Put {
                dest,
                addr,
                bytes,
                handle,
            } => {
                let segment = &self.segments[dest];
                if !segment.contains(addr, bytes.len()) {
                    return Err(TransportError::OutOfSegment {
                        rank: dest,
                        addr,
                        len: bytes.len(),
                    });
                }
                segment.write(addr, &bytes);
                handle.complete(None);
            }
            RmaOp::Get {
                src,
                addr,
                len,
                handle,
            } => {
                let segment = &self.segments[src];
                if !segment.contains(addr, len) {
                    return Err(TransportError::OutOfSegment {
                        rank: src,
                        addr,
                        len,
                    });
                }
                handle.complete(Some(segment.read(addr, len)));
            }
            RmaOp::Atomic {
                dest,
                addr,
                len,
                update,
                handle,
            } => {
                let segment = &self.segments[dest];
                if !segment.contains(addr, len) {
                    return Err(TransportError::OutOfSegment {
                        rank: dest,
                        addr,
                        len,
                    });
                }
                handle.complete(Some(segment.update(addr, len, update)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("ranks", &self.ranks)
            .field("ranks_per_node", &self.ranks_per_node)
            .field("failed", &self.has_failed())
            .finish_non_exhaustive()
    }
}

/// One rank's view of a [`Fabric`].
#[derive(Debug, Clone)]
pub struct SmpTransport {
    fabric: Arc<Fabric>,
    rank: Rank,
}

impl SmpTransport {
    /// The fabric this endpoint belongs to.
    #[must_use]
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }
}

impl Transport for SmpTransport {
    fn rank_me(&self) -> Rank {
        self.rank
    }

    fn rank_n(&self) -> usize {
        self.fabric.ranks
    }

    fn is_local(&self, rank: Rank) -> bool {
        rank < self.fabric.ranks && self.fabric.node_of(rank) == self.fabric.node_of(self.rank)
    }

    fn segment(&self, rank: Rank) -> Option<Arc<Segment>> {
        if self.is_local(rank) {
            self.fabric.segments.get(rank).cloned()
        } else {
            None
        }
    }

    fn send(&self, dest: Rank, packet: Packet) -> Result<(), TransportError> {
        self.fabric.check_rank(dest)?;
        self.fabric.inboxes[dest].push(packet);
        Ok(())
    }

    fn poll(&self, max_n: usize, deliver: &mut dyn FnMut(Packet)) -> Result<usize, TransportError> {
        if self.fabric.has_failed() {
            return Err(TransportError::PeerFailed);
        }

        let mut done = 0;
        let rma = &self.fabric.rma[self.rank];
        while done < max_n {
            let Some(op) = rma.pop() else { break };
            self.fabric.run_rma(op)?;
            done += 1;
        }

        let inbox = &self.fabric.inboxes[self.rank];
        let mut delivered = 0;
        while delivered < max_n {
            let Some(packet) = inbox.pop() else { break };
            deliver(packet);
            delivered += 1;
        }
        Ok(done + delivered)
    }

    fn rma_put(&self, dest: Rank, addr: u64, bytes: Vec<u8>) -> Result<RmaHandle, TransportError> {
        self.fabric.check_rank(dest)?;
        let handle = RmaHandle::new();
        self.fabric.rma[self.rank].push(RmaOp::Put {
            dest,
            addr,
            bytes,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn rma_get(&self, src: Rank, addr: u64, len: usize) -> Result<RmaHandle, TransportError> {
        self.fabric.check_rank(src)?;
        let handle = RmaHandle::new();
        self.fabric.rma[self.rank].push(RmaOp::Get {
            src,
            addr,
            len,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn rma_atomic(
        &self,
        dest: Rank,
        addr: u64,
        len: usize,
        update: AtomicUpdate,
    ) -> Result<RmaHandle, TransportError> {
        self.fabric.check_rank(dest)?;
        let handle = RmaHandle::new();
        self.fabric.rma[self.rank].push(RmaOp::Atomic {
            dest,
            addr,
            len,
            update,
            handle: handle.clone(),
        });
        Ok(handle)
    }
}

/// Flags the fabric when a rank thread unwinds so its peers stop waiting.
struct FailureGuard<'a> {
    fabric: &'a Fabric,
    rank: Rank,
}

impl Drop for FailureGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(rank = self.rank, "rank thread panicked");
            self.fabric.fail(self.rank);
        }
    }
}

/// Runs `f` on `ranks` threads, each bound to its own runtime over a shared
/// [`Fabric`], and returns the per-rank results in rank order.
///
/// Each runtime is finalized (with its closing barrier) after `f` returns,
/// unless `f` finalized it already. If any rank panics, the others fail at
/// their next poll and the first failing rank's panic is resumed here.
pub fn launch<F, R>(ranks: usize, config: RuntimeConfig, f: F) -> Vec<R>
where
    F: Fn(&Runtime) -> R + Sync,
    R: Send,
{
    if ranks == 0 {
        fatal("smp::launch needs at least one rank");
    }
    let mut config = config;
    config.normalize();
    let fabric = Fabric::new(ranks, config.ranks_per_node, config.segment_size);
    debug!(
        ranks,
        ranks_per_node = config.ranks_per_node,
        segment_size = config.segment_size,
        "launching in-process job"
    );

    let outcomes: Vec<std::thread::Result<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..ranks)
            .map(|rank| {
                let fabric = Arc::clone(&fabric);
                let config = config.clone();
                let f = &f;
                std::thread::Builder::new()
                    .name(format!("pgasync-rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let _guard = FailureGuard {
                            fabric: &fabric,
                            rank,
                        };
                        let rt = RuntimeBuilder::from_config(config)
                            .build(Arc::new(fabric.transport(rank)))
                            .unwrap_or_else(|e| {
                                fatal(format!("rank {rank} failed to initialize: {e}"))
                            });
                        let out = f(&rt);
                        if !rt.is_finalized() {
                            rt.finalize();
                        }
                        out
                    })
                    .unwrap_or_else(|e| fatal(format!("failed to spawn rank {rank}: {e}")))
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let first_failure = *fabric.first_failure.lock();
    let mut results = Vec::with_capacity(ranks);
    let mut panics: Vec<(Rank, Box<dyn std::any::Any + Send>)> = Vec::new();
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => results.push(value),
            Err(panic) => panics.push((rank, panic)),
        }
    }
    if !panics.is_empty() {
        let index = first_failure
            .and_then(|failed| panics.iter().position(|(rank, _)| *rank == failed))
            .unwrap_or(0);
        let (_, panic) = panics.swap_remove(index);
        std::panic::resume_unwind(panic);
    }
    results
}
