//! Mailbox backed by a lock-free segmented queue.
//!
//! `burst` snapshots the queue length before running anything, so items
//! enqueued while the burst runs wait for the next burst, matching the
//! detach-then-run behavior of the sharded mailbox.

use crossbeam_queue::SegQueue;

use super::{Lpc, Mailbox};

/// Lock-free mailbox.
#[derive(Debug, Default)]
pub struct LockFreeMailbox {
    queue: SegQueue<Lpc>,
}

impl LockFreeMailbox {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }
}

impl Mailbox for LockFreeMailbox {
    fn enqueue(&self, item: Lpc) {
        self.queue.push(item);
    }

    fn burst(&self, max_n: usize) -> usize {
        let budget = self.queue.len().min(max_n);
        let mut executed = 0;
        while executed < budget {
            let Some(item) = self.queue.pop() else {
                break;
            };
            item();
            executed += 1;
        }
        executed
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
