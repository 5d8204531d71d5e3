//! The writer side of a future.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Future, FutureCell, Value};
use crate::diagnostic::fatal;
use crate::pgas_assert;

struct Shared<T> {
    cell: Arc<FutureCell<T>>,
    /// Outstanding dependencies: one for the result itself plus every
    /// anonymous dependency registered and not yet fulfilled.
    countdown: AtomicIsize,
    value: Mutex<Option<T>>,
    result_supplied: AtomicBool,
    future_taken: AtomicBool,
}

/// Unique writer handle to a future's result.
///
/// A promise starts with one outstanding dependency, satisfied by
/// [`fulfill_result`](Self::fulfill_result) (or [`finalize`](Self::finalize)
/// for `Promise<()>`). [`require_anonymous`](Self::require_anonymous) adds
/// more; each must be matched by [`fulfill_anonymous`](Self::fulfill_anonymous).
/// The future becomes ready when the count reaches zero.
///
/// ```ignore
/// let p = Promise::<u64>::new();
/// p.require_anonymous(2);
/// let f = p.get_future();
/// p.fulfill_result(7);
/// p.fulfill_anonymous(2);
/// assert_eq!(f.result(), 7);
/// ```
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Value> Promise<T> {
    /// Creates a promise with a single outstanding dependency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cell: FutureCell::pending(),
                countdown: AtomicIsize::new(1),
                value: Mutex::new(None),
                result_supplied: AtomicBool::new(false),
                future_taken: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the future tied to this promise. May be called once.
    #[must_use]
    #[track_caller]
    pub fn get_future(&self) -> Future<T> {
        if self.shared.future_taken.swap(true, Ordering::AcqRel) {
            fatal("get_future() called more than once on the same promise");
        }
        Future::from_cell(Arc::clone(&self.shared.cell))
    }

    /// Adds `n` anonymous dependencies.
    #[track_caller]
    pub fn require_anonymous(&self, n: usize) {
        let n = to_delta(n);
        let prev = self.shared.countdown.fetch_add(n, Ordering::AcqRel);
        pgas_assert!(
            prev > 0,
            "require_anonymous() on a promise whose dependencies are already satisfied"
        );
    }

    /// Satisfies `n` anonymous dependencies.
    #[track_caller]
    pub fn fulfill_anonymous(&self, n: usize) {
        self.countdown(to_delta(n));
    }

    /// Supplies the result and satisfies the result dependency.
    ///
    /// Supplying a result twice is a usage error.
    #[track_caller]
    pub fn fulfill_result(&self, value: T) {
        if self.shared.result_supplied.swap(true, Ordering::AcqRel) {
            fatal("fulfill_result() called more than once on the same promise");
        }
        *self.shared.value.lock() = Some(value);
        self.countdown(1);
    }

    /// Returns true once the future is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.cell.is_ready()
    }

    /// Another writer handle on the same dependency state, for operations
    /// that fulfil a caller's promise on completion.
    pub(crate) fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    #[track_caller]
    fn countdown(&self, n: isize) {
        let prev = self.shared.countdown.fetch_sub(n, Ordering::AcqRel);
        let now = prev - n;
        pgas_assert!(
            now >= 0,
            "promise dependency counter went negative ({now})"
        );
        if now == 0 {
            let Some(value) = self.shared.value.lock().take() else {
                fatal("promise dependencies satisfied before a result was supplied");
            };
            self.shared.cell.fulfill(Arc::new(value));
        }
    }
}

impl Promise<()> {
    /// Satisfies the result dependency of a value-less promise.
    #[track_caller]
    pub fn finalize(&self) {
        self.fulfill_result(());
    }
}

impl<T: Value> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("countdown", &self.shared.countdown.load(Ordering::Acquire))
            .field("cell", &self.shared.cell)
            .finish()
    }
}

#[track_caller]
fn to_delta(n: usize) -> isize {
    isize::try_from(n).unwrap_or_else(|_| fatal(format!("dependency count {n} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn ready_only_after_result_and_anonymous_deps() {
        init_test_logging();
        crate::test_phase!("ready_only_after_result_and_anonymous_deps");
        let promise = Promise::<u64>::new();
        promise.require_anonymous(2);
        let future = promise.get_future();

        promise.fulfill_result(7);
        crate::assert_with_log!(!future.is_ready(), "two anon deps left", false, future.is_ready());
        promise.fulfill_anonymous(1);
        assert!(!future.is_ready());
        promise.fulfill_anonymous(1);
        crate::assert_with_log!(future.is_ready(), "all deps met", true, future.is_ready());
        assert_eq!(future.result(), 7);
        crate::test_complete!("ready_only_after_result_and_anonymous_deps");
    }

    #[test]
    fn anonymous_deps_before_result_keep_future_pending() {
        init_test_logging();
        let promise = Promise::<&'static str>::new();
        promise.require_anonymous(1);
        let future = promise.get_future();
        promise.fulfill_anonymous(1);
        assert!(!future.is_ready());
        promise.fulfill_result("done");
        assert_eq!(future.result(), "done");
        assert!(promise.is_ready());
    }

    #[test]
    fn finalize_readies_unit_promise() {
        let promise = Promise::<()>::default();
        let future = promise.get_future();
        promise.finalize();
        assert!(future.is_ready());
    }

    #[test]
    fn fulfilment_from_another_thread() {
        init_test_logging();
        let promise = Promise::<Vec<u8>>::new();
        let future = promise.get_future();
        std::thread::spawn(move || promise.fulfill_result(vec![1, 2, 3]))
            .join()
            .expect("fulfilling thread panicked");
        assert_eq!(future.wait(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "fulfill_result() called more than once")]
    fn double_fulfill_is_fatal() {
        init_test_logging();
        let promise = Promise::<u8>::new();
        promise.fulfill_result(1);
        promise.fulfill_result(2);
    }

    #[test]
    #[should_panic(expected = "get_future() called more than once")]
    fn double_get_future_is_fatal() {
        init_test_logging();
        let promise = Promise::<u8>::new();
        let _first = promise.get_future();
        let _second = promise.get_future();
    }

    #[test]
    #[should_panic(expected = "went negative")]
    fn over_fulfilling_anonymous_is_fatal() {
        init_test_logging();
        let promise = Promise::<()>::new();
        promise.fulfill_anonymous(2);
    }
}
