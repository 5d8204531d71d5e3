//! Binomial-tree broadcast.

use std::sync::Arc;

use super::{absolute, binomial_children, check_root, relative, signal, CollectiveId, CollectiveState};
use crate::diagnostic::fatal;
use crate::future::{make_future, Future, FutureCell, Value};
use crate::runtime::Runtime;
use crate::team::Team;
use crate::tracing_compat::trace;

struct BroadcastState<T> {
    value: Option<T>,
    waiter: Option<Arc<FutureCell<T>>>,
    done: bool,
}

impl<T> Default for BroadcastState<T> {
    fn default() -> Self {
        Self {
            value: None,
            waiter: None,
            done: false,
        }
    }
}

impl<T: Send + Sync + 'static> CollectiveState for BroadcastState<T> {
    fn is_complete(&self) -> bool {
        self.done
    }
}

impl Team {
    /// Broadcasts `value` from member `root`. The argument is ignored on
    /// every other member; all members' futures hold the root's value.
    #[track_caller]
    pub fn broadcast<T: Value>(&self, value: T, root: usize) -> Future<T> {
        self.runtime().metrics().collectives.increment();
        let id = self.next_collective();
        start_broadcast(self, id, root, Some(value))
    }
}

/// Starts broadcast `id`. `value` is required on the root only.
#[track_caller]
pub(crate) fn start_broadcast<T: Value>(team: &Team, id: CollectiveId, root: usize, value: Option<T>) -> Future<T> {
    check_root(team, root);
    let rt = team.runtime();
    let n = team.rank_n();
    let rel = relative(team.rank_me(), root, n);
    if rel == 0 {
        let value = value.unwrap_or_else(|| fatal(format!("broadcast {id} root has no value")));
        forward(&rt, team, id, root, &value);
        return make_future(value);
    }

    let cell = FutureCell::pending();
    let waiter = Arc::clone(&cell);
    let arrived = rt.collectives().with(id, |state: &mut BroadcastState<T>| {
        match state.value.take() {
            Some(value) => {
                state.done = true;
                Some(value)
            }
            None => {
                state.waiter = Some(waiter);
                None
            }
        }
    });
    match arrived {
        Some(value) => make_future(value),
        None => Future::from_cell(cell),
    }
}

fn forward<T: Value>(rt: &Runtime, team: &Team, id: CollectiveId, root: usize, value: &T) {
    let n = team.rank_n();
    let rel = relative(team.rank_me(), root, n);
    for (_, child) in binomial_children(rel, n) {
        let value = value.clone();
        signal(
            rt,
            team,
            absolute(child, root, n),
            Box::new(move |rt| on_value(rt, id, root, value)),
        );
    }
}

fn on_value<T: Value>(rt: &Runtime, id: CollectiveId, root: usize, value: T) {
    let team = rt.team(id.team);
    trace!(collective = %id, rank = team.rank_me(), "broadcast value arrived");
    forward(rt, &team, id, root, &value);
    let ready = rt.collectives().with(id, |state: &mut BroadcastState<T>| {
        match state.waiter.take() {
            Some(waiter) => {
                state.done = true;
                Some((waiter, value))
            }
            None => {
                state.value = Some(value);
                None
            }
        }
    });
    if let Some((waiter, value)) = ready {
        waiter.fulfill(Arc::new(value));
    }
}
