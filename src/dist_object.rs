//! Distributed objects: one value per team member under a shared name.
//!
//! Constructing a [`DistObject`] is collective in the sense that every
//! member must construct the team's distributed objects (and start its
//! collectives) in the same order, since the name is the team's next
//! sequence number. Construction itself sends nothing.
//!
//! [`DistObject::fetch`] asks another member for a clone of its value. If
//! that member has not constructed its instance yet, the request waits there
//! until it does.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::collectives::{CollectiveId, CollectiveState};
use crate::future::{make_future, Future, FutureCell, Value};
use crate::runtime::Runtime;
use crate::team::Team;
use crate::tracing_compat::trace;

struct DistSlot<T> {
    value: Option<T>,
    waiters: Vec<Arc<FutureCell<T>>>,
}

impl<T> Default for DistSlot<T> {
    fn default() -> Self {
        Self {
            value: None,
            waiters: Vec::new(),
        }
    }
}

impl<T: Send + Sync + 'static> CollectiveState for DistSlot<T> {
    fn is_complete(&self) -> bool {
        false
    }
}

/// This member's instance of a team-wide named value.
pub struct DistObject<T: Value> {
    id: CollectiveId,
    team: Team,
    value: T,
}

impl<T: Value> DistObject<T> {
    /// Registers this member's `value` under the team's next name.
    pub fn new(team: &Team, value: T) -> Self {
        let rt = team.runtime();
        let id = team.next_collective();
        let published = value.clone();
        let waiters = rt.dist_objects().with(id, |slot: &mut DistSlot<T>| {
            slot.value = Some(published);
            std::mem::take(&mut slot.waiters)
        });
        if !waiters.is_empty() {
            let shared = Arc::new(value.clone());
            for waiter in waiters {
                waiter.fulfill(Arc::clone(&shared));
            }
        }
        trace!(object = %id, rank = team.rank_me(), "dist object constructed");
        Self {
            id,
            team: team.clone(),
            value,
        }
    }

    /// Name shared by every member's instance.
    #[must_use]
    pub fn id(&self) -> CollectiveId {
        self.id
    }

    /// The team the object belongs to.
    #[must_use]
    pub fn team(&self) -> &Team {
        &self.team
    }

    /// Fetches a clone of member `rank`'s value.
    #[track_caller]
    pub fn fetch(&self, rank: usize) -> Future<T> {
        let id = self.id;
        let dest = self.team.to_world(rank);
        self.team.runtime().rpc_with(dest, move |rt| when_here::<T>(rt, id))
    }
}

/// The local value of object `id`, once constructed.
fn when_here<T: Value>(rt: &Runtime, id: CollectiveId) -> Future<T> {
    let cell = FutureCell::pending();
    let waiter = Arc::clone(&cell);
    let value = rt.dist_objects().with(id, |slot: &mut DistSlot<T>| match &slot.value {
        Some(value) => Some(value.clone()),
        None => {
            slot.waiters.push(waiter);
            None
        }
    });
    match value {
        Some(value) => make_future(value),
        None => Future::from_cell(cell),
    }
}

impl<T: Value> Deref for DistObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Value> Drop for DistObject<T> {
    fn drop(&mut self) {
        if let Some(rt) = self.team.try_runtime() {
            rt.dist_objects().remove(self.id);
        }
    }
}

impl<T: Value + fmt::Debug> fmt::Debug for DistObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistObject")
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, test_config};
    use crate::transport::smp;

    #[test]
    fn fetch_reads_each_members_value() {
        init_test_logging();
        crate::test_phase!("fetch_reads_each_members_value");
        let got = smp::launch(4, test_config(), |rt| {
            let obj = DistObject::new(rt.world(), format!("value of {}", rt.rank_me()));
            assert_eq!(*obj, format!("value of {}", rt.rank_me()));
            let next = (rt.rank_me() + 1) % rt.rank_n();
            let fetched = obj.fetch(next).wait();
            rt.barrier();
            fetched
        });
        assert_eq!(got[3], "value of 0");
        assert_eq!(got[1], "value of 2");
        crate::test_complete!("fetch_reads_each_members_value");
    }

    #[test]
    fn fetch_waits_for_late_construction() {
        init_test_logging();
        let got = smp::launch(2, test_config(), |rt| {
            if rt.rank_me() == 0 {
                // Name the object rank 1 will construct next, and ask for it.
                let id = rt.world().next_collective();
                let early = rt.rpc_with(1, move |rt| when_here::<u32>(rt, id));
                let value = early.wait();
                rt.barrier();
                Some(value)
            } else {
                while rt.dist_objects().len() == 0 {
                    rt.progress(crate::ProgressLevel::User);
                }
                let obj = DistObject::new(rt.world(), 99_u32);
                rt.barrier();
                drop(obj);
                None
            }
        });
        assert_eq!(got[0], Some(99));
    }
}
