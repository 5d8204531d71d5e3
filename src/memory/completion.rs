//! Completion requests for one-sided transfers.
//!
//! Plain `rput`/`rget` report completion through a returned future. The
//! `_with` forms take an explicit request instead:
//!
//! - [`OperationCx`] says how the *initiator* learns that the transfer is
//!   done: a future, an anonymous dependency on a caller's [`Promise`], or a
//!   callback queued on a [`Persona`].
//! - [`RemoteCx`] runs a callable on the *target* rank once a put's bytes
//!   have landed there.
//!
//! ```ignore
//! let done = Promise::<()>::new();
//! for (i, peer) in peers.iter().enumerate() {
//!     rt.rput_with(i as u64, *peer, OperationCx::as_promise(&done));
//! }
//! done.finalize();
//! done.get_future().wait();
//! ```

use std::fmt;
use std::sync::Arc;

use crate::future::{Future, FutureCell, Promise, Value};
use crate::persona::Persona;

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

enum OperationKind<T> {
    Ignored,
    Future,
    Promise(Promise<T>),
    Lpc(Persona, Callback<T>),
}

/// How the initiator is told that a transfer finished.
pub struct OperationCx<T> {
    kind: OperationKind<T>,
}

impl<T: Value> OperationCx<T> {
    /// Completion is reported through the future the call returns.
    #[must_use]
    pub fn as_future() -> Self {
        Self {
            kind: OperationKind::Future,
        }
    }

    /// Completion satisfies an anonymous dependency of `promise`.
    ///
    /// The dependency is registered when the transfer starts. For a get the
    /// fetched value is also supplied as the promise's result.
    #[must_use]
    pub fn as_promise(promise: &Promise<T>) -> Self {
        Self {
            kind: OperationKind::Promise(promise.share()),
        }
    }

    /// Completion queues `f` on `persona`, which runs it during its next
    /// user-level progress.
    #[must_use]
    pub fn as_lpc<F>(persona: &Persona, f: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            kind: OperationKind::Lpc(persona.clone(), Box::new(f)),
        }
    }

    fn ignored() -> Self {
        Self {
            kind: OperationKind::Ignored,
        }
    }

    /// Registers the request at initiation. Returns the future when one was
    /// asked for, and the action to run on completion. `supplies_result`
    /// selects whether the completion value becomes a promise's result.
    pub(crate) fn start(self, supplies_result: bool) -> (Option<Future<T>>, Callback<T>) {
        match self.kind {
            OperationKind::Ignored => (None, Box::new(|_| {})),
            OperationKind::Future => {
                let cell = FutureCell::pending();
                let target = Arc::clone(&cell);
                (
                    Some(Future::from_cell(cell)),
                    Box::new(move |value| target.fulfill(Arc::new(value))),
                )
            }
            OperationKind::Promise(promise) => {
                promise.require_anonymous(1);
                (
                    None,
                    Box::new(move |value| {
                        if supplies_result {
                            promise.fulfill_result(value);
                        }
                        promise.fulfill_anonymous(1);
                    }),
                )
            }
            OperationKind::Lpc(persona, f) => (
                None,
                Box::new(move |value| persona.lpc_ff(move || f(value))),
            ),
        }
    }
}

impl<T: Value> Default for OperationCx<T> {
    fn default() -> Self {
        Self::as_future()
    }
}

impl<T> fmt::Debug for OperationCx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            OperationKind::Ignored => "ignored",
            OperationKind::Future => "future",
            OperationKind::Promise(_) => "promise",
            OperationKind::Lpc(..) => "lpc",
        };
        f.debug_tuple("OperationCx").field(&kind).finish()
    }
}

/// Work run on the target rank after a put lands.
pub struct RemoteCx {
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl RemoteCx {
    /// Runs `f` on the target's master persona, at user level, once the
    /// written bytes are visible there.
    #[must_use]
    pub fn as_rpc<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    pub(crate) fn into_fn(self) -> Box<dyn FnOnce() + Send + 'static> {
        self.f
    }
}

impl fmt::Debug for RemoteCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RemoteCx")
    }
}

/// The completion requests of one put. The default asks for a future.
#[derive(Debug)]
pub struct PutCompletions {
    pub(crate) operation: Option<OperationCx<()>>,
    pub(crate) remote: Option<RemoteCx>,
}

impl PutCompletions {
    /// Adds a remote completion.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteCx) -> Self {
        self.remote = Some(remote);
        self
    }

    pub(crate) fn operation(&mut self) -> OperationCx<()> {
        self.operation.take().unwrap_or_else(OperationCx::ignored)
    }
}

impl Default for PutCompletions {
    fn default() -> Self {
        OperationCx::as_future().into()
    }
}

impl From<OperationCx<()>> for PutCompletions {
    fn from(operation: OperationCx<()>) -> Self {
        Self {
            operation: Some(operation),
            remote: None,
        }
    }
}

impl From<RemoteCx> for PutCompletions {
    /// Only the target is notified; the initiator asks for nothing.
    fn from(remote: RemoteCx) -> Self {
        Self {
            operation: None,
            remote: Some(remote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::ProgressLevel;
    use crate::persona::current_persona;
    use crate::runtime::progress;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;

    #[test]
    fn promise_request_holds_the_promise_open() {
        init_test_logging();
        crate::test_phase!("promise_request_holds_the_promise_open");
        let promise = Promise::<()>::new();
        let future = promise.get_future();
        let (none, first) = OperationCx::as_promise(&promise).start(false);
        let (_, second) = OperationCx::as_promise(&promise).start(false);
        assert!(none.is_none());

        promise.finalize();
        first(());
        crate::assert_with_log!(
            !future.is_ready(),
            "one transfer outstanding",
            false,
            future.is_ready()
        );
        second(());
        assert!(future.is_ready());
        crate::test_complete!("promise_request_holds_the_promise_open");
    }

    #[test]
    fn value_promise_receives_the_result() {
        init_test_logging();
        let promise = Promise::<u32>::new();
        let future = promise.get_future();
        let (_, done) = OperationCx::as_promise(&promise).start(true);
        assert!(!future.is_ready());
        done(17);
        assert_eq!(future.result(), 17);
    }

    #[test]
    fn lpc_request_runs_on_the_persona() {
        init_test_logging();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let (_, done) =
            OperationCx::as_lpc(&current_persona(), move |v: u8| *s.lock() = Some(v)).start(false);
        done(3);
        assert_eq!(*seen.lock(), None);
        progress(ProgressLevel::User);
        assert_eq!(*seen.lock(), Some(3));
    }

    #[test]
    fn remote_only_put_asks_nothing_of_the_initiator() {
        let mut cxs = PutCompletions::from(RemoteCx::as_rpc(|| {}));
        let (future, done) = cxs.operation().start(false);
        assert!(future.is_none());
        done(());
        assert!(cxs.remote.is_some());

        let mut cxs = PutCompletions::from(OperationCx::as_future());
        let (future, done) = cxs.operation().start(false);
        done(());
        assert!(future.is_some_and(|f| f.is_ready()));
    }
}
