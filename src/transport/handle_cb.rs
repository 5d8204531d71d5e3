//! Network-completion callbacks.
//!
//! Each node pairs an [`RmaHandle`] with the closure to run once the
//! transport marks it done. Nodes are drained in bursts during internal
//! progress by the thread that has the owning persona active: completed
//! nodes run and are removed, the rest keep their relative order.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use super::RmaHandle;

type Completion = Box<dyn FnOnce(Option<Vec<u8>>) + Send + 'static>;

struct HandleCb {
    handle: RmaHandle,
    on_done: Completion,
}

/// Per-persona queue of pending network completions.
#[derive(Default)]
pub struct HandleCbQueue {
    nodes: Mutex<VecDeque<HandleCb>>,
}

impl HandleCbQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `on_done` to run with the handle's payload once it
    /// completes.
    pub fn push<F>(&self, handle: RmaHandle, on_done: F)
    where
        F: FnOnce(Option<Vec<u8>>) + Send + 'static,
    {
        self.nodes.lock().push_back(HandleCb {
            handle,
            on_done: Box::new(on_done),
        });
    }

    /// Runs up to `max_n` completed callbacks. Returns how many ran.
    ///
    /// The queue is detached before any callback runs so callbacks may
    /// register new nodes; those land behind the nodes still pending.
    pub fn burst(&self, max_n: usize) -> usize {
        let detached = std::mem::take(&mut *self.nodes.lock());
        if detached.is_empty() {
            return 0;
        }

        let mut pending = VecDeque::with_capacity(detached.len());
        let mut ready = Vec::new();
        for node in detached {
            if ready.len() < max_n && node.handle.is_done() {
                ready.push(node);
            } else {
                pending.push_back(node);
            }
        }

        {
            let mut live = self.nodes.lock();
            pending.append(&mut live);
            *live = pending;
        }

        let executed = ready.len();
        for node in ready {
            let data = node.handle.take_data();
            (node.on_done)(data);
        }
        executed
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns true if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandleCbQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCbQueue")
            .field("pending", &self.len())
            .finish()
    }
}
