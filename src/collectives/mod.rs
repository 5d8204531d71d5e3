//! Collective operations: barrier, broadcast and reductions.
//!
//! Every member of a team must start the team's collectives in the same
//! order; each start consumes the team's next sequence number, so the
//! `(team, seq)` pair names the same operation on every member. Signals
//! travel as internal-level active messages to the destination's master
//! persona. A signal can overtake the local start of the collective it
//! belongs to; its state then waits in the runtime's [`Registry`] until the
//! local call arrives.
//!
//! Registry state is only mutated under the registry lock. Messages are sent
//! and futures fulfilled after the lock is released, because fulfilling can
//! start the next collective on the same rank.

mod barrier;
mod broadcast;
mod reduce;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

pub(crate) use broadcast::start_broadcast;
pub(crate) use reduce::{start_reduce, ReduceOp};

use crate::diagnostic::fatal;
use crate::inbox::ProgressLevel;
use crate::runtime::Runtime;
use crate::team::{Team, TeamId};
use crate::transport::{Command, Recipient};
use crate::Rank;

/// Names one collective instance on one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectiveId {
    /// Team the collective runs on.
    pub team: TeamId,
    /// Position in the team's sequence of collectives.
    pub seq: u64,
}

impl fmt::Display for CollectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.team, self.seq)
    }
}

/// Per-instance state parked in a [`Registry`].
pub(crate) trait CollectiveState: Default + Send + 'static {
    /// Once true the registry drops the entry.
    fn is_complete(&self) -> bool;
}

/// Type-erased state of in-flight collectives, keyed by instance.
#[derive(Default)]
pub(crate) struct Registry {
    slots: Mutex<HashMap<CollectiveId, Box<dyn Any + Send>>>,
}

impl Registry {
    /// Runs `f` on the state of `id` under the registry lock, creating the
    /// state if absent and dropping it once complete.
    #[track_caller]
    pub(crate) fn with<S, R>(&self, id: CollectiveId, f: impl FnOnce(&mut S) -> R) -> R
    where
        S: CollectiveState,
    {
        let mut slots = self.slots.lock();
        let entry = slots
            .entry(id)
            .or_insert_with(|| Box::new(S::default()));
        let Some(state) = entry.downcast_mut::<S>() else {
            fatal(format!(
                "collective {id} was started with a different operation or type on another rank"
            ));
        };
        let out = f(state);
        let complete = state.is_complete();
        if complete {
            slots.remove(&id);
        }
        out
    }

    /// Drops the state of `id`, if any.
    pub(crate) fn remove(&self, id: CollectiveId) {
        self.slots.lock().remove(&id);
    }

    /// Number of instances with parked state.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

/// Sends an internal-level signal to team member `team_rank`.
pub(crate) fn signal(rt: &Runtime, team: &Team, team_rank: usize, command: Command) {
    rt.send(
        team.to_world(team_rank),
        Recipient::Master,
        ProgressLevel::Internal,
        command,
    );
}

#[track_caller]
pub(crate) fn check_root(team: &Team, root: usize) {
    if root >= team.rank_n() {
        fatal(format!(
            "collective root {root} out of range for {} (rank_n = {})",
            team.id(),
            team.rank_n()
        ));
    }
}

/// Position of `rank` in a tree rooted at `root`.
pub(crate) const fn relative(rank: usize, root: usize, n: usize) -> usize {
    (rank + n - root) % n
}

/// Inverse of [`relative`].
pub(crate) const fn absolute(rel: usize, root: usize, n: usize) -> usize {
    (rel + root) % n
}

/// Children of `rel` in a binomial tree over `0..n` rooted at 0, each with
/// the slot it reports through. Slots grow with the child's rank, and child
/// subtrees cover consecutive, increasing rank ranges.
pub(crate) fn binomial_children(rel: usize, n: usize) -> Vec<(u32, usize)> {
    let lowbit = if rel == 0 {
        usize::MAX
    } else {
        rel & rel.wrapping_neg()
    };
    let mut children = Vec::new();
    for k in 0..usize::BITS {
        let step = 1usize << k;
        if step >= lowbit {
            break;
        }
        match rel.checked_add(step) {
            Some(child) if child < n => children.push((k, child)),
            _ => break,
        }
    }
    children
}

/// Parent of `rel` (non-zero) in the tree of [`binomial_children`].
pub(crate) const fn binomial_parent(rel: usize) -> usize {
    rel & (rel - 1)
}

/// Children of `me` in a radix-`2^log2` tree over `0..n` rooted at 0.
pub(crate) fn radix_children(me: usize, n: usize, log2: u32) -> Vec<usize> {
    let radix = 1usize << log2;
    let mut children = Vec::new();
    let mut stride = 1usize;
    while stride < n {
        let Some(span) = stride.checked_mul(radix) else {
            break;
        };
        if me % span != 0 {
            break;
        }
        for k in 1..radix {
            match k.checked_mul(stride).and_then(|d| me.checked_add(d)) {
                Some(child) if child < n => children.push(child),
                _ => break,
            }
        }
        stride = span;
    }
    children
}

/// Parent of `me` in the tree of [`radix_children`]: `me` with its lowest
/// non-zero base-radix digit cleared.
pub(crate) fn radix_parent(me: usize, log2: u32) -> Option<usize> {
    if me == 0 {
        return None;
    }
    let radix = 1usize << log2;
    let mut stride = 1usize;
    loop {
        let span = stride * radix;
        if me % span != 0 {
            let digit = (me / stride) % radix;
            return Some(me - digit * stride);
        }
        stride = span;
    }
}

impl Runtime {
    /// Blocks until every rank has entered the barrier. See
    /// [`Team::barrier`].
    #[track_caller]
    pub fn barrier(&self) {
        self.world().barrier();
    }

    /// World barrier returning a future.
    pub fn barrier_async(&self) -> crate::Future<()> {
        self.world().barrier_async()
    }

    /// World broadcast of `value` from `root`.
    pub fn broadcast<T: crate::future::Value>(&self, value: T, root: Rank) -> crate::Future<T> {
        self.world().broadcast(value, root)
    }

    /// World reduction to `root`.
    pub fn reduce_one<T, F>(&self, value: T, op: F, root: Rank) -> crate::Future<Option<T>>
    where
        T: crate::future::Value,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.world().reduce_one(value, op, root)
    }

    /// World reduction delivered to every rank.
    pub fn reduce_all<T, F>(&self, value: T, op: F) -> crate::Future<T>
    where
        T: crate::future::Value,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.world().reduce_all(value, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn binomial_tree_shape() {
        assert_eq!(binomial_children(0, 8), vec![(0, 1), (1, 2), (2, 4)]);
        assert_eq!(binomial_children(4, 8), vec![(0, 5), (1, 6)]);
        assert_eq!(binomial_children(6, 8), vec![(0, 7)]);
        assert_eq!(binomial_children(0, 5), vec![(0, 1), (1, 2), (2, 4)]);
        assert!(binomial_children(4, 5).is_empty());
        assert!(binomial_children(0, 1).is_empty());
        assert_eq!(binomial_parent(6), 4);
        assert_eq!(binomial_parent(5), 4);
    }

    #[test]
    fn radix_tree_shape() {
        assert_eq!(radix_children(0, 10, 2), vec![1, 2, 3, 4, 8]);
        assert_eq!(radix_children(4, 10, 2), vec![5, 6, 7]);
        assert_eq!(radix_children(8, 10, 2), vec![9]);
        assert!(radix_children(5, 10, 2).is_empty());
        assert_eq!(radix_parent(7, 2), Some(4));
        assert_eq!(radix_parent(8, 2), Some(0));
        assert_eq!(radix_parent(0, 2), None);
    }

    #[test]
    fn relative_round_trips() {
        for n in 1..6 {
            for root in 0..n {
                for r in 0..n {
                    assert_eq!(absolute(relative(r, root, n), root, n), r);
                }
            }
        }
        assert_eq!(relative(1, 3, 4), 2);
    }

    proptest! {
        #[test]
        fn binomial_tree_spans_every_rank(n in 1usize..200) {
            let mut seen = vec![0u32; n];
            for rel in 0..n {
                for (slot, child) in binomial_children(rel, n) {
                    prop_assert_eq!(binomial_parent(child), rel);
                    prop_assert_eq!(child.trailing_zeros(), slot);
                    seen[child] += 1;
                }
            }
            prop_assert_eq!(seen[0], 0);
            prop_assert!(seen[1..].iter().all(|&c| c == 1));
        }

        #[test]
        fn radix_tree_spans_every_rank(n in 1usize..300, log2 in 1u32..5) {
            let mut seen = vec![0u32; n];
            for me in 0..n {
                for child in radix_children(me, n, log2) {
                    prop_assert_eq!(radix_parent(child, log2), Some(me));
                    seen[child] += 1;
                }
            }
            prop_assert_eq!(seen[0], 0);
            prop_assert!(seen[1..].iter().all(|&c| c == 1));
        }
    }
}
