//! Teams: ordered groups of ranks that run collectives together.
//!
//! Every runtime starts with two teams, [`Runtime::world`] (all ranks, in
//! rank order) and [`Runtime::local_team`] (the ranks sharing memory with
//! this one). [`Team::split`] derives sub-teams collectively.
//!
//! A team's identifier is the same on every member, so collective messages
//! name the team by id and the receiver resolves it in its own registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::collectives::CollectiveId;
use crate::diagnostic::fatal;
use crate::runtime::{Runtime, RuntimeInner};
use crate::tracing_compat::debug;
use crate::Rank;

const LOCAL_TEAM_TAG: u64 = 0x6c6f_6361_6c00_0000;

/// Identifier of a team, equal on every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(u64);

impl TeamId {
    /// The world team.
    pub const WORLD: Self = Self(0);

    /// Id of the local team whose lowest member is `first_rank`.
    #[must_use]
    pub(crate) fn local(first_rank: Rank) -> Self {
        Self(mix(LOCAL_TEAM_TAG ^ first_rank as u64) | 1)
    }

    fn child(parent: Self, color: u64, seq: u64) -> Self {
        Self(mix(mix(parent.0 ^ color) ^ seq) | 1)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::WORLD {
            f.write_str("team#world")
        } else {
            write!(f, "team#{:016x}", self.0)
        }
    }
}

/// splitmix64 finalizer.
const fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

struct TeamInner {
    id: TeamId,
    ranks: Vec<Rank>,
    rank_me: usize,
    next_seq: AtomicU64,
    runtime: Weak<RuntimeInner>,
}

/// An ordered group of ranks. Cheap to clone.
#[derive(Clone)]
pub struct Team {
    inner: Arc<TeamInner>,
}

impl Team {
    #[track_caller]
    pub(crate) fn new(id: TeamId, ranks: Vec<Rank>, world_me: Rank, runtime: Weak<RuntimeInner>) -> Self {
        let rank_me = ranks
            .iter()
            .position(|&r| r == world_me)
            .unwrap_or_else(|| fatal(format!("rank {world_me} is not a member of {id}")));
        Self {
            inner: Arc::new(TeamInner {
                id,
                ranks,
                rank_me,
                next_seq: AtomicU64::new(0),
                runtime,
            }),
        }
    }

    /// Team identifier.
    #[must_use]
    pub fn id(&self) -> TeamId {
        self.inner.id
    }

    /// This rank's index in the team.
    #[must_use]
    pub fn rank_me(&self) -> usize {
        self.inner.rank_me
    }

    /// Number of members.
    #[must_use]
    pub fn rank_n(&self) -> usize {
        self.inner.ranks.len()
    }

    /// World rank of team member `rank`.
    #[must_use]
    #[track_caller]
    pub fn to_world(&self, rank: usize) -> Rank {
        self.inner.ranks.get(rank).copied().unwrap_or_else(|| {
            fatal(format!(
                "team rank {rank} out of range for {} (rank_n = {})",
                self.id(),
                self.rank_n()
            ))
        })
    }

    /// Team index of world rank `rank`, if it is a member.
    #[must_use]
    pub fn from_world(&self, rank: Rank) -> Option<usize> {
        self.inner.ranks.iter().position(|&r| r == rank)
    }

    /// Returns true if world rank `rank` is a member.
    #[must_use]
    pub fn contains(&self, rank: Rank) -> bool {
        self.from_world(rank).is_some()
    }

    /// Members in team order, as world ranks.
    #[must_use]
    pub fn ranks(&self) -> &[Rank] {
        &self.inner.ranks
    }

    /// The runtime this team belongs to.
    #[track_caller]
    pub(crate) fn runtime(&self) -> Runtime {
        self.try_runtime()
            .unwrap_or_else(|| fatal(format!("{} used after its runtime was dropped", self.id())))
    }

    pub(crate) fn try_runtime(&self) -> Option<Runtime> {
        Runtime::from_weak(&self.inner.runtime)
    }

    /// Identifier of the next collective started on this team. Every member
    /// must start the team's collectives in the same order.
    pub(crate) fn next_collective(&self) -> CollectiveId {
        CollectiveId {
            team: self.id(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Collectively splits the team. Members passing the same `color` form
    /// a new team, ordered by `(key, world rank)`. Blocks like
    /// [`barrier`](Self::barrier).
    #[track_caller]
    pub fn split(&self, color: u64, key: u64) -> Self {
        let rt = self.runtime();
        let me = rt.rank_me();
        let entries = self
            .reduce_all(vec![(color, key, me)], |mut a, b| {
                a.extend(b);
                a
            })
            .wait();
        let seq = self.next_collective().seq;

        let mut members: Vec<(u64, Rank)> = entries
            .into_iter()
            .filter(|&(c, _, _)| c == color)
            .map(|(_, k, r)| (k, r))
            .collect();
        members.sort_unstable();
        let ranks = members.into_iter().map(|(_, r)| r).collect();
        let child = Self::new(TeamId::child(self.id(), color, seq), ranks, me, rt.downgrade());
        rt.register_team(&child);
        debug!(
            parent = %self.id(),
            team = %child.id(),
            color,
            rank_me = child.rank_me(),
            rank_n = child.rank_n(),
            "team split"
        );
        // Nobody may message the new team before every member knows it.
        self.barrier();
        child
    }
}

impl PartialEq for Team {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Team {}

impl fmt::Debug for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.inner.id)
            .field("rank_me", &self.inner.rank_me)
            .field("ranks", &self.inner.ranks)
            .finish_non_exhaustive()
    }
}
