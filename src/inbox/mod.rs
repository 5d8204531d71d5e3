//! Deferred-work mailboxes.
//!
//! A persona owns one [`Inbox`], which is two FIFO mailboxes: one for
//! internal work the runtime itself depends on (network completions,
//! collective signalling) and one for user-visible work (RPC bodies,
//! continuations, local procedure calls). Keeping them apart lets internal
//! progress run without draining user callbacks.
//!
//! Both mailbox strategies obey the same contract:
//!
//! - `enqueue` appends in O(1) and never runs the item.
//! - `burst(max_n)` detaches the queued items, runs at most `max_n` of them in
//!   enqueue order *without holding any lock*, and puts the leftovers back in
//!   front of anything enqueued meanwhile.
//!
//! Items enqueued by an item that is running are therefore never executed by
//! the same burst.

mod lockfree;
mod sharded;

use std::fmt;

pub use lockfree::LockFreeMailbox;
pub use sharded::ShardedMailbox;

/// A queued local procedure call.
pub type Lpc = Box<dyn FnOnce() + Send + 'static>;

/// Which class of queued work a progress call may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressLevel {
    /// Only work the runtime needs to make internal progress.
    Internal,
    /// Internal work plus user callbacks and RPC bodies.
    User,
}

/// A FIFO queue of deferred work with burst draining.
pub trait Mailbox: Send + Sync {
    /// Appends an item to the tail.
    fn enqueue(&self, item: Lpc);

    /// Runs up to `max_n` queued items in order and returns how many ran.
    fn burst(&self, max_n: usize) -> usize;

    /// Approximate number of queued items.
    fn len(&self) -> usize;

    /// Returns true if nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mailbox strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InboxKind {
    /// Lock pool sharded by queue identity.
    #[default]
    Sharded,
    /// Lock-free segmented queue.
    LockFree,
}

impl InboxKind {
    /// Builds an empty mailbox of this kind.
    #[must_use]
    pub fn build(self) -> Box<dyn Mailbox> {
        match self {
            Self::Sharded => Box::new(ShardedMailbox::new()),
            Self::LockFree => Box::new(LockFreeMailbox::new()),
        }
    }

    /// Parses `sharded` / `lockfree` (case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sharded" | "locked" => Some(Self::Sharded),
            "lockfree" | "lock-free" | "lock_free" => Some(Self::LockFree),
            _ => None,
        }
    }
}

impl fmt::Display for InboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sharded => f.write_str("sharded"),
            Self::LockFree => f.write_str("lockfree"),
        }
    }
}

/// The internal and user mailboxes of one persona.
pub struct Inbox {
    kind: InboxKind,
    internal: Box<dyn Mailbox>,
    user: Box<dyn Mailbox>,
}

impl Inbox {
    /// Creates an empty inbox using the given strategy for both levels.
    #[must_use]
    pub fn new(kind: InboxKind) -> Self {
        Self {
            kind,
            internal: kind.build(),
            user: kind.build(),
        }
    }

    /// Strategy used by this inbox.
    #[must_use]
    pub const fn kind(&self) -> InboxKind {
        self.kind
    }

    fn mailbox(&self, level: ProgressLevel) -> &dyn Mailbox {
        match level {
            ProgressLevel::Internal => self.internal.as_ref(),
            ProgressLevel::User => self.user.as_ref(),
        }
    }

    /// Appends `item` to the mailbox for `level`.
    pub fn enqueue(&self, level: ProgressLevel, item: Lpc) {
        self.mailbox(level).enqueue(item);
    }

    /// Bursts the mailbox for `level`.
    pub fn burst(&self, level: ProgressLevel, max_n: usize) -> usize {
        self.mailbox(level).burst(max_n)
    }

    /// Number of items queued at `level`.
    #[must_use]
    pub fn len(&self, level: ProgressLevel) -> usize {
        self.mailbox(level).len()
    }

    /// Returns true if both levels are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.user.is_empty()
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("kind", &self.kind)
            .field("internal", &self.internal.len())
            .field("user", &self.user.len())
            .finish()
    }
}
