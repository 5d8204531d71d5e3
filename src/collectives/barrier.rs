//! Tree barrier.
//!
//! Arrivals flow up a radix-`2^barrier_radix_log2` tree rooted at team rank
//! 0: a member reports to its parent once it and all its children have
//! arrived. The root then releases down the same tree. A member forwards the
//! release to its children before completing its own future.

use std::sync::Arc;

use super::{radix_children, radix_parent, signal, CollectiveId, CollectiveState};
use crate::diagnostic::fatal;
use crate::future::{Future, FutureCell};
use crate::pgas_assert;
use crate::runtime::Runtime;
use crate::team::Team;
use crate::tracing_compat::trace;

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    waiter: Option<Arc<FutureCell<()>>>,
    released: bool,
}

impl CollectiveState for BarrierState {
    fn is_complete(&self) -> bool {
        self.released
    }
}

impl Team {
    /// Enters a barrier and returns a future ready once every member has
    /// entered it.
    pub fn barrier_async(&self) -> Future<()> {
        let rt = self.runtime();
        rt.metrics().collectives.increment();
        let id = self.next_collective();
        trace!(collective = %id, rank = self.rank_me(), "barrier entered");

        let cell = FutureCell::pending();
        let waiter = Arc::clone(&cell);
        let expected = expected_arrivals(&rt, self);
        let complete = rt.collectives().with(id, |state: &mut BarrierState| {
            state.waiter = Some(waiter);
            state.arrived += 1;
            state.arrived == expected
        });
        if complete {
            subtree_arrived(&rt, self, id);
        }
        Future::from_cell(cell)
    }

    /// Blocks until every member has entered the barrier. The calling thread
    /// must have the master persona active.
    #[track_caller]
    pub fn barrier(&self) {
        let rt = self.runtime();
        pgas_assert!(
            rt.master_persona().active_with_caller(),
            "barrier() requires the master persona to be active on the calling thread"
        );
        self.barrier_async().wait();
    }
}

fn expected_arrivals(rt: &Runtime, team: &Team) -> usize {
    1 + radix_children(team.rank_me(), team.rank_n(), rt.config().barrier_radix_log2).len()
}

fn on_arrival(rt: &Runtime, id: CollectiveId) {
    let team = rt.team(id.team);
    let expected = expected_arrivals(rt, &team);
    let complete = rt.collectives().with(id, |state: &mut BarrierState| {
        state.arrived += 1;
        state.arrived == expected
    });
    if complete {
        subtree_arrived(rt, &team, id);
    }
}

fn subtree_arrived(rt: &Runtime, team: &Team, id: CollectiveId) {
    match radix_parent(team.rank_me(), rt.config().barrier_radix_log2) {
        Some(parent) => signal(rt, team, parent, Box::new(move |rt| on_arrival(rt, id))),
        None => release(rt, team, id),
    }
}

fn release(rt: &Runtime, team: &Team, id: CollectiveId) {
    for child in radix_children(team.rank_me(), team.rank_n(), rt.config().barrier_radix_log2) {
        signal(
            rt,
            team,
            child,
            Box::new(move |rt| {
                let team = rt.team(id.team);
                release(rt, &team, id);
            }),
        );
    }
    let waiter = rt.collectives().with(id, |state: &mut BarrierState| {
        state.released = true;
        state.waiter.take()
    });
    let Some(waiter) = waiter else {
        fatal(format!("barrier {id} released before this rank entered it"));
    };
    trace!(collective = %id, rank = team.rank_me(), "barrier released");
    waiter.fulfill(Arc::new(()));
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{init_test_logging, test_config};
    use crate::transport::smp;
    use crate::RuntimeConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nobody_leaves_before_everyone_enters() {
        init_test_logging();
        crate::test_phase!("nobody_leaves_before_everyone_enters");
        for radix_log2 in [1, 2, 4] {
            crate::test_section!(format!("radix 2^{radix_log2}"));
            let entered = AtomicUsize::new(0);
            let config = RuntimeConfig {
                barrier_radix_log2: radix_log2,
                ..test_config()
            };
            let seen = smp::launch(7, config, |rt| {
                entered.fetch_add(1, Ordering::SeqCst);
                rt.barrier();
                entered.load(Ordering::SeqCst)
            });
            assert!(seen.iter().all(|&n| n == 7), "{seen:?}");
        }
        crate::test_complete!("nobody_leaves_before_everyone_enters");
    }

    #[test]
    fn consecutive_barriers_stay_separate() {
        init_test_logging();
        let rounds = AtomicUsize::new(0);
        smp::launch(4, test_config(), |rt| {
            for round in 0..10 {
                rounds.fetch_add(1, Ordering::SeqCst);
                rt.barrier();
                assert!(rounds.load(Ordering::SeqCst) >= 4 * (round + 1));
                rt.barrier();
            }
        });
    }

    #[test]
    fn async_barrier_overlaps_other_work() {
        init_test_logging();
        smp::launch(3, test_config(), |rt| {
            let done = rt.barrier_async();
            let echoed = rt.rpc((rt.rank_me() + 1) % 3, |x: usize| x, rt.rank_me()).wait();
            assert_eq!(echoed, rt.rank_me());
            done.wait();
        });
    }

    #[test]
    #[should_panic(expected = "requires the master persona")]
    fn blocking_barrier_needs_master() {
        init_test_logging();
        crate::test_utils::with_single_rank(|rt| {
            rt.liberate_master_persona();
            rt.barrier();
        });
    }
}
