//! Shared result storage behind a pending future.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::diagnostic::fatal;

/// Callback run once the cell becomes ready.
///
/// Dependents are crate-internal plumbing (when-all counters, forwarding
/// into another cell, RPC replies). They run synchronously on the thread
/// that readies the cell, outside the cell's lock. User continuations are
/// never dependents directly; `then` wraps them in a dependent that only
/// enqueues onto a persona.
pub(crate) type Dependent<T> = Box<dyn FnOnce(Arc<T>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Dependent<T>>),
    Ready(Arc<T>),
}

/// Reference-counted result slot: pending until [`FutureCell::fulfill`],
/// ready and immutable afterwards.
pub(crate) struct FutureCell<T> {
    state: Mutex<State<T>>,
}

impl<T: Send + Sync + 'static> FutureCell<T> {
    pub(crate) fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending(Vec::new())),
        })
    }

    pub(crate) fn ready(value: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Ready(value)),
        })
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), State::Ready(_))
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        match &*self.state.lock() {
            State::Ready(value) => Some(Arc::clone(value)),
            State::Pending(_) => None,
        }
    }

    /// Runs `dependent` once the value is available, immediately if it
    /// already is.
    pub(crate) fn on_ready(&self, dependent: Dependent<T>) {
        let value = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(dependents) => {
                    dependents.push(dependent);
                    return;
                }
                State::Ready(value) => Arc::clone(value),
            }
        };
        dependent(value);
    }

    /// Publishes the value and runs the registered dependents.
    #[track_caller]
    pub(crate) fn fulfill(&self, value: Arc<T>) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Ready(Arc::clone(&value)));
        let State::Pending(dependents) = previous else {
            fatal("future result published twice");
        };
        for dependent in dependents {
            dependent(Arc::clone(&value));
        }
    }
}

impl<T> fmt::Debug for FutureCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ready, waiting) = match &*self.state.lock() {
            State::Pending(deps) => (false, deps.len()),
            State::Ready(_) => (true, 0),
        };
        f.debug_struct("FutureCell")
            .field("ready", &ready)
            .field("dependents", &waiting)
            .finish()
    }
}
