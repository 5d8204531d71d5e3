//! Binomial-tree reductions.
//!
//! Each member folds its own value with its children's partial results in
//! increasing child order. Child subtrees cover consecutive ranges of
//! root-relative ranks, so the operator is always applied left to right in
//! root-relative rank order: `op(op(v0, v1), op(v2, v3))` for four members.
//! The operator must be associative; it need not be commutative.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    absolute, binomial_children, binomial_parent, check_root, relative, signal, start_broadcast,
    CollectiveId, CollectiveState,
};
use crate::diagnostic::fatal;
use crate::future::{Future, FutureCell, Value};
use crate::runtime::Runtime;
use crate::team::Team;
use crate::tracing_compat::trace;

/// A shared reduction operator.
pub(crate) type ReduceOp<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

struct ReduceState<T> {
    own: Option<T>,
    op: Option<ReduceOp<T>>,
    parts: BTreeMap<u32, T>,
    waiter: Option<Arc<FutureCell<Option<T>>>>,
    done: bool,
}

impl<T> Default for ReduceState<T> {
    fn default() -> Self {
        Self {
            own: None,
            op: None,
            parts: BTreeMap::new(),
            waiter: None,
            done: false,
        }
    }
}

impl<T: Send + Sync + 'static> CollectiveState for ReduceState<T> {
    fn is_complete(&self) -> bool {
        self.done
    }
}

/// Everything needed to finish a member's part once its inputs are in.
struct Inputs<T> {
    own: T,
    parts: Vec<T>,
    op: ReduceOp<T>,
    waiter: Arc<FutureCell<Option<T>>>,
}

impl<T> ReduceState<T> {
    fn take_if_complete(&mut self, expected: usize) -> Option<Inputs<T>> {
        if self.parts.len() < expected {
            return None;
        }
        let own = self.own.take()?;
        let (Some(op), Some(waiter)) = (self.op.take(), self.waiter.take()) else {
            fatal("reduction state lost its operator");
        };
        self.done = true;
        Some(Inputs {
            own,
            parts: std::mem::take(&mut self.parts).into_values().collect(),
            op,
            waiter,
        })
    }
}

impl Team {
    /// Reduces every member's `value` with `op` onto member `root`. The
    /// root's future holds `Some(result)`, every other member's holds `None`.
    #[track_caller]
    pub fn reduce_one<T, F>(&self, value: T, op: F, root: usize) -> Future<Option<T>>
    where
        T: Value,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.runtime().metrics().collectives.increment();
        let id = self.next_collective();
        start_reduce(self, id, root, value, Arc::new(op))
    }

    /// Reduces every member's `value` with `op` and delivers the result to
    /// every member.
    pub fn reduce_all<T, F>(&self, value: T, op: F) -> Future<T>
    where
        T: Value,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.runtime().metrics().collectives.increment();
        let reduce_id = self.next_collective();
        let broadcast_id = self.next_collective();
        let partial = start_reduce(self, reduce_id, 0, value, Arc::new(op));
        if self.rank_me() != 0 {
            return start_broadcast(self, broadcast_id, 0, None);
        }

        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        let team = self.clone();
        partial.on_ready(move |total| {
            let total = Option::clone(&total)
                .unwrap_or_else(|| fatal(format!("reduction {reduce_id} root produced no value")));
            start_broadcast(&team, broadcast_id, 0, Some(total)).forward_to(target);
        });
        Future::from_cell(out)
    }
}

/// Starts reduction `id` with this member's contribution.
#[track_caller]
pub(crate) fn start_reduce<T: Value>(
    team: &Team,
    id: CollectiveId,
    root: usize,
    value: T,
    op: ReduceOp<T>,
) -> Future<Option<T>> {
    check_root(team, root);
    let rt = team.runtime();
    let expected = expected_parts(team, root);
    let cell = FutureCell::pending();
    let waiter = Arc::clone(&cell);
    let ready = rt.collectives().with(id, |state: &mut ReduceState<T>| {
        state.own = Some(value);
        state.op = Some(op);
        state.waiter = Some(waiter);
        state.take_if_complete(expected)
    });
    if let Some(inputs) = ready {
        finish(&rt, team, id, root, inputs);
    }
    Future::from_cell(cell)
}

fn expected_parts(team: &Team, root: usize) -> usize {
    let n = team.rank_n();
    binomial_children(relative(team.rank_me(), root, n), n).len()
}

fn on_part<T: Value>(rt: &Runtime, id: CollectiveId, root: usize, slot: u32, value: T) {
    let team = rt.team(id.team);
    let expected = expected_parts(&team, root);
    let ready = rt.collectives().with(id, |state: &mut ReduceState<T>| {
        if state.parts.insert(slot, value).is_some() {
            fatal(format!("reduction {id} received slot {slot} twice"));
        }
        state.take_if_complete(expected)
    });
    if let Some(inputs) = ready {
        finish(rt, &team, id, root, inputs);
    }
}

fn finish<T: Value>(rt: &Runtime, team: &Team, id: CollectiveId, root: usize, inputs: Inputs<T>) {
    let Inputs {
        own,
        parts,
        op,
        waiter,
    } = inputs;
    let acc = parts.into_iter().fold(own, |acc, part| op(acc, part));

    let n = team.rank_n();
    let rel = relative(team.rank_me(), root, n);
    if rel == 0 {
        trace!(collective = %id, "reduction complete at root");
        waiter.fulfill(Arc::new(Some(acc)));
        return;
    }
    let parent = absolute(binomial_parent(rel), root, n);
    let slot = rel.trailing_zeros();
    signal(
        rt,
        team,
        parent,
        Box::new(move |rt| on_part(rt, id, root, slot, acc)),
    );
    waiter.fulfill(Arc::new(None));
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{init_test_logging, test_config};
    use crate::transport::smp;

    #[test]
    fn reduce_one_delivers_only_at_root() {
        init_test_logging();
        crate::test_phase!("reduce_one_delivers_only_at_root");
        let got = smp::launch(5, test_config(), |rt| {
            rt.reduce_one(rt.rank_me() as u64 + 1, |a, b| a * b, 3).wait()
        });
        assert_eq!(got, vec![None, None, None, Some(120), None]);
        crate::test_complete!("reduce_one_delivers_only_at_root");
    }

    #[test]
    fn reduce_all_sums_everywhere() {
        init_test_logging();
        for n in [1, 2, 3, 8] {
            let got = smp::launch(n, test_config(), |rt| {
                rt.reduce_all(rt.rank_me(), |a, b| a + b).wait()
            });
            assert!(got.iter().all(|&s| s == n * (n - 1) / 2), "n={n}: {got:?}");
        }
    }

    #[test]
    fn non_commutative_op_applies_in_relative_rank_order() {
        init_test_logging();
        let got = smp::launch(6, test_config(), |rt| {
            let root = 2;
            let concat = |a: String, b: String| a + &b;
            rt.reduce_one(rt.rank_me().to_string(), concat, root).wait()
        });
        assert_eq!(got[2].as_deref(), Some("234501"));
    }

    #[test]
    fn reduce_all_with_vectors() {
        init_test_logging();
        let got = smp::launch(4, test_config(), |rt| {
            rt.reduce_all(vec![rt.rank_me()], |mut a, b| {
                a.extend(b);
                a
            })
            .wait()
        });
        assert!(got.iter().all(|v| *v == vec![0, 1, 2, 3]));
    }
}
