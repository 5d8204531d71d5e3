//! Transport layer errors.

use thiserror::Error;

use crate::Rank;

/// Errors a transport reports when it cannot accept an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination rank does not exist.
    #[error("rank {rank} out of range (job has {ranks} ranks)")]
    RankOutOfRange {
        /// The offending rank.
        rank: Rank,
        /// Number of ranks in the job.
        ranks: usize,
    },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// A peer rank failed; the job cannot continue.
    #[error("peer rank failed")]
    PeerFailed,

    /// A remote memory access fell outside the target segment.
    #[error("remote access to rank {rank} at {addr:#x}+{len} is outside its segment")]
    OutOfSegment {
        /// Target rank.
        rank: Rank,
        /// Start address.
        addr: u64,
        /// Byte length.
        len: usize,
    },
}
