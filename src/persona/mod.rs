//! Personas: the contexts that own deferred work.
//!
//! A [`Persona`] owns an [`Inbox`] (internal and user mailboxes) and a queue
//! of pending network-completion callbacks. Any thread may enqueue work onto
//! any persona, but only a thread that has the persona *active* drains it.
//!
//! Every thread has a stack of active personas. Its default persona sits at
//! the bottom and is never popped; [`PersonaScope`] pushes another persona on
//! top for the scope's lifetime. A persona can be active on at most one
//! thread at a time; it can appear several times on that thread's stack.
//!
//! Work a thread issues is bound to its *current* persona (the top of its
//! stack): continuations registered with `then`, RPC replies and network
//! completions all come back there.

mod scope;
pub(crate) mod tls;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

pub use scope::PersonaScope;

use crate::future::{make_future, Future, FutureCell, Resolve};
use crate::inbox::{Inbox, InboxKind, Lpc, ProgressLevel};
use crate::transport::handle_cb::HandleCbQueue;

/// Process-unique persona identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersonaId(u64);

impl PersonaId {
    /// Raw identifier value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persona#{}", self.0)
    }
}

static NEXT_PERSONA_ID: AtomicU64 = AtomicU64::new(1);

/// Mailbox strategy for personas created without an explicit one.
static DEFAULT_INBOX_KIND: AtomicU8 = AtomicU8::new(0);

pub(crate) fn set_default_inbox_kind(kind: InboxKind) {
    let raw = match kind {
        InboxKind::Sharded => 0,
        InboxKind::LockFree => 1,
    };
    DEFAULT_INBOX_KIND.store(raw, Ordering::Relaxed);
}

fn default_inbox_kind() -> InboxKind {
    match DEFAULT_INBOX_KIND.load(Ordering::Relaxed) {
        1 => InboxKind::LockFree,
        _ => InboxKind::Sharded,
    }
}

type Registry = Mutex<HashMap<PersonaId, Weak<PersonaInner>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) struct PersonaInner {
    id: PersonaId,
    /// Token of the thread that has this persona active, 0 when inactive.
    owner: AtomicU64,
    inbox: Inbox,
    handle_cbs: HandleCbQueue,
}

impl Drop for PersonaInner {
    fn drop(&mut self) {
        registry().lock().remove(&self.id);
    }
}

/// A progress context owning queued deferred work.
///
/// Cloning yields another handle to the same persona.
#[derive(Clone)]
pub struct Persona {
    inner: Arc<PersonaInner>,
}

impl Persona {
    /// Creates an inactive persona with the process default mailbox
    /// strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_inbox(default_inbox_kind())
    }

    /// Creates an inactive persona with an explicit mailbox strategy.
    #[must_use]
    pub fn with_inbox(kind: InboxKind) -> Self {
        let id = PersonaId(NEXT_PERSONA_ID.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::new(PersonaInner {
            id,
            owner: AtomicU64::new(0),
            inbox: Inbox::new(kind),
            handle_cbs: HandleCbQueue::new(),
        });
        registry().lock().insert(id, Arc::downgrade(&inner));
        Self { inner }
    }

    /// Looks up a live persona by id.
    pub(crate) fn lookup(id: PersonaId) -> Option<Self> {
        let weak = registry().lock().get(&id).cloned()?;
        weak.upgrade().map(|inner| Self { inner })
    }

    /// This persona's identifier.
    #[must_use]
    pub fn id(&self) -> PersonaId {
        self.inner.id
    }

    /// Returns true if the calling thread has this persona active.
    #[must_use]
    pub fn active_with_caller(&self) -> bool {
        self.owner() == tls::thread_token()
    }

    /// Returns true if some thread has this persona active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.owner() != 0
    }

    /// Makes this persona current on the calling thread until the returned
    /// scope is dropped.
    #[must_use]
    #[track_caller]
    pub fn activate(&self) -> PersonaScope {
        PersonaScope::new(self)
    }

    /// Queues `f` to run on this persona during its owner's user-level
    /// progress. Fire and forget.
    pub fn lpc_ff<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(ProgressLevel::User, Box::new(f));
    }

    /// Queues `f` to run on this persona and returns a future, bound to the
    /// calling thread's current persona, of its (flattened) result.
    pub fn lpc<F, R>(&self, f: F) -> Future<R::Value>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Resolve,
    {
        let origin = current_persona();
        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        self.lpc_ff(move || {
            f().resolve().on_ready(move |value| {
                origin.lpc_ff(move || target.fulfill(value));
            });
        });
        Future::from_cell(out)
    }

    /// Number of items waiting in this persona's mailboxes.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.inbox.len(ProgressLevel::Internal) + self.inner.inbox.len(ProgressLevel::User)
    }

    pub(crate) fn enqueue(&self, level: ProgressLevel, item: Lpc) {
        self.inner.inbox.enqueue(level, item);
    }

    pub(crate) fn burst(&self, level: ProgressLevel, max_n: usize) -> usize {
        self.inner.inbox.burst(level, max_n)
    }

    pub(crate) fn handle_cbs(&self) -> &HandleCbQueue {
        &self.inner.handle_cbs
    }

    pub(crate) fn owner(&self) -> u64 {
        self.inner.owner.load(Ordering::Acquire)
    }

    pub(crate) fn claim(&self, token: u64) {
        self.inner.owner.store(token, Ordering::Release);
    }

    pub(crate) fn try_claim(&self, token: u64) -> bool {
        self.inner
            .owner
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.inner.owner.store(0, Ordering::Release);
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Persona {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Persona {}

impl fmt::Debug for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persona")
            .field("id", &self.inner.id)
            .field("owner", &self.owner())
            .field("inbox", &self.inner.inbox)
            .finish()
    }
}

/// The innermost active persona of the calling thread.
#[must_use]
pub fn current_persona() -> Persona {
    tls::current()
}

/// The calling thread's default persona.
#[must_use]
pub fn default_persona() -> Persona {
    tls::default_persona()
}

/// A future that is ready once `persona` has drained everything queued on it
/// at the time of the call.
#[must_use]
pub fn persona_flush(persona: &Persona) -> Future<()> {
    if persona.queued() == 0 {
        return make_future(());
    }
    persona.lpc(|| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::progress;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_persona_is_current_and_active() {
        init_test_logging();
        let current = current_persona();
        assert_eq!(current, default_persona());
        assert!(current.active_with_caller());
        assert!(current.is_active());
    }

    #[test]
    fn scope_pushes_and_pops() {
        init_test_logging();
        crate::test_phase!("scope_pushes_and_pops");
        let persona = Persona::new();
        assert!(!persona.is_active());
        {
            let _scope = persona.activate();
            assert_eq!(current_persona(), persona);
            assert!(persona.active_with_caller());
        }
        assert!(!persona.is_active());
        assert_eq!(current_persona(), default_persona());
        crate::test_complete!("scope_pushes_and_pops");
    }

    #[test]
    fn redundant_scope_keeps_persona_active() {
        init_test_logging();
        let persona = Persona::new();
        let outer = persona.activate();
        {
            let _inner = persona.activate();
        }
        assert!(persona.active_with_caller());
        drop(outer);
        assert!(!persona.is_active());
    }

    #[test]
    #[should_panic(expected = "already active in another thread")]
    fn activating_on_two_threads_is_fatal() {
        init_test_logging();
        let persona = Persona::new();
        let _scope = persona.activate();
        let other = persona.clone();
        let result = std::thread::spawn(move || {
            crate::test_utils::init_test_logging();
            let _scope = other.activate();
        })
        .join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    #[test]
    #[should_panic(expected = "out of LIFO order")]
    fn out_of_order_release_is_fatal() {
        init_test_logging();
        let a = Persona::new();
        let b = Persona::new();
        let scope_a = a.activate();
        let _scope_b = b.activate();
        drop(scope_a);
    }

    #[test]
    fn lpc_runs_on_target_and_completes_on_origin() {
        init_test_logging();
        let worker = Persona::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let future = worker.lpc(move || {
            h.fetch_add(1, Ordering::SeqCst);
            21_u32 * 2
        });

        // The worker persona is not active anywhere yet.
        progress(ProgressLevel::User);
        assert!(!future.is_ready());

        let handle = {
            let worker = worker.clone();
            std::thread::spawn(move || {
                let _scope = worker.activate();
                while progress(ProgressLevel::User) == 0 {}
            })
        };
        handle.join().expect("worker thread");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(future.wait(), 42);
    }

    #[test]
    fn flush_waits_for_queued_work() {
        init_test_logging();
        let persona = current_persona();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        persona.lpc_ff(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
        persona_flush(&persona).wait();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_finds_live_personas_only() {
        let persona = Persona::new();
        let id = persona.id();
        assert_eq!(Persona::lookup(id), Some(persona.clone()));
        drop(persona);
        assert!(Persona::lookup(id).is_none());
    }
}
