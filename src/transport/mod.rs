//! Transport layer abstraction.
//!
//! The runtime needs very little from the network: a way to enqueue an
//! active message for a destination rank, a way to drain arrived messages
//! and completed hardware operations, one-sided byte transfers into another
//! rank's segment, and a predicate telling which ranks share memory with
//! this one. [`Transport`] is that seam. [`smp`] implements it in-process
//! with one thread per rank.

pub mod error;
pub mod handle_cb;
pub mod smp;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub use error::TransportError;
pub use handle_cb::HandleCbQueue;

use crate::inbox::ProgressLevel;
use crate::memory::Segment;
use crate::persona::PersonaId;
use crate::runtime::Runtime;
use crate::Rank;

/// Work carried by an active message, run on the destination rank.
pub type Command = Box<dyn FnOnce(&Runtime) + Send + 'static>;

/// The read-modify-write of an atomic transfer: maps the current bytes at
/// the target to the bytes to store.
pub type AtomicUpdate = Box<dyn FnOnce(&[u8]) -> Vec<u8> + Send + 'static>;

/// Which persona on the destination rank receives a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// The destination's master persona.
    Master,
    /// A specific persona, typically the one that issued a request.
    Persona(PersonaId),
}

/// An active message.
pub struct Packet {
    /// Sending rank.
    pub source: Rank,
    /// Receiving persona on the destination.
    pub recipient: Recipient,
    /// Mailbox level the command is queued at.
    pub level: ProgressLevel,
    /// The work itself.
    pub command: Command,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("source", &self.source)
            .field("recipient", &self.recipient)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RmaState {
    done: AtomicBool,
    data: Mutex<Option<Vec<u8>>>,
}

/// Completion handle of a one-sided transfer.
///
/// The transport completes it (with the fetched bytes for a get); the
/// initiator observes it through its persona's [`HandleCbQueue`].
#[derive(Clone, Default)]
pub struct RmaHandle {
    state: Arc<RmaState>,
}

impl RmaHandle {
    /// Creates an incomplete handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the operation complete, storing any fetched bytes.
    pub fn complete(&self, data: Option<Vec<u8>>) {
        *self.state.data.lock() = data;
        self.state.done.store(true, Ordering::Release);
    }

    /// Returns true once the operation has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    /// Takes the fetched bytes of a completed get.
    #[must_use]
    pub fn take_data(&self) -> Option<Vec<u8>> {
        self.state.data.lock().take()
    }
}

impl fmt::Debug for RmaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RmaHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

/// The network operations the runtime consumes.
///
/// Implementations must keep messages from one sender to one destination in
/// FIFO order and must never block in any method.
pub trait Transport: Send + Sync + 'static {
    /// This rank.
    fn rank_me(&self) -> Rank;

    /// Number of ranks in the job.
    fn rank_n(&self) -> usize;

    /// Returns true if `rank` shares memory with this rank.
    fn is_local(&self, rank: Rank) -> bool;

    /// The shared segment of a rank that shares memory with this one.
    fn segment(&self, rank: Rank) -> Option<Arc<Segment>>;

    /// Enqueues a packet for `dest`.
    fn send(&self, dest: Rank, packet: Packet) -> Result<(), TransportError>;

    /// Advances outstanding hardware operations and hands up to `max_n`
    /// arrived packets to `deliver`. Returns the amount of work done.
    fn poll(&self, max_n: usize, deliver: &mut dyn FnMut(Packet)) -> Result<usize, TransportError>;

    /// Starts writing `bytes` at `addr` in `dest`'s segment.
    fn rma_put(&self, dest: Rank, addr: u64, bytes: Vec<u8>) -> Result<RmaHandle, TransportError>;

    /// Starts reading `len` bytes at `addr` from `src`'s segment.
    fn rma_get(&self, src: Rank, addr: u64, len: usize) -> Result<RmaHandle, TransportError>;

    /// Starts an atomic update of `len` bytes at `addr` in `dest`'s segment.
    /// The handle completes with the bytes held before the update.
    fn rma_atomic(
        &self,
        dest: Rank,
        addr: u64,
        len: usize,
        update: AtomicUpdate,
    ) -> Result<RmaHandle, TransportError>;
}
