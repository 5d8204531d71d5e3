//! Mailbox backed by a process-wide pool of sharded locks.
//!
//! Every mailbox gets a unique id; the id is hashed (Fibonacci hashing) to
//! one of 512 shards, and the shard's mutex guards the queues of every
//! mailbox that maps to it. Producers and the consumer of one mailbox only
//! hold the shard lock long enough to push, detach, or re-splice, never while
//! running an item.
//!
//! # Lock ordering
//!
//! A thread holds at most one shard lock at a time and never calls out of
//! this module while holding it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::{Lpc, Mailbox};

const SHARD_BITS: u32 = 9;
const SHARD_COUNT: usize = 1 << SHARD_BITS;
const GOLDEN_RATIO: u64 = 0x9e37_79b9_7f4a_7c15;

type Shard = Mutex<HashMap<u64, VecDeque<Lpc>>>;

struct ShardPool {
    shards: Box<[Shard]>,
}

impl ShardPool {
    fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }
}

fn pool() -> &'static ShardPool {
    static POOL: OnceLock<ShardPool> = OnceLock::new();
    POOL.get_or_init(ShardPool::new)
}

static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(1);

const fn shard_index(id: u64) -> usize {
    (id.wrapping_mul(GOLDEN_RATIO) >> (64 - SHARD_BITS)) as usize
}

/// Lock-based mailbox whose storage lives in a shared, sharded lock pool.
#[derive(Debug)]
pub struct ShardedMailbox {
    id: u64,
    shard: usize,
}

impl ShardedMailbox {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        let id = NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            shard: shard_index(id),
        }
    }

    fn shard(&self) -> &'static Shard {
        &pool().shards[self.shard]
    }
}

impl Default for ShardedMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox for ShardedMailbox {
    fn enqueue(&self, item: Lpc) {
        self.shard()
            .lock()
            .entry(self.id)
            .or_default()
            .push_back(item);
    }

    fn burst(&self, max_n: usize) -> usize {
        let mut detached = {
            let mut shard = self.shard().lock();
            match shard.get_mut(&self.id) {
                Some(live) if !live.is_empty() => std::mem::take(live),
                _ => return 0,
            }
        };

        let mut executed = 0;
        while executed < max_n {
            let Some(item) = detached.pop_front() else {
                break;
            };
            item();
            executed += 1;
        }

        if !detached.is_empty() {
            let mut shard = self.shard().lock();
            let live = shard.entry(self.id).or_default();
            detached.append(live);
            *live = detached;
        }
        executed
    }

    fn len(&self) -> usize {
        self.shard().lock().get(&self.id).map_or(0, VecDeque::len)
    }
}

impl Drop for ShardedMailbox {
    fn drop(&mut self) {
        let leftover = self.shard().lock().remove(&self.id);
        // Dropping queued closures may run arbitrary destructors; do it
        // outside the shard lock.
        drop(leftover);
    }
}
