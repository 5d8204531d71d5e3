//! Futures and promises.
//!
//! A [`Future<T>`] is a handle on a value that may not exist yet. It is
//! either *ready* (the value is available and never changes again) or
//! *pending*. Futures are not polled by an executor: they become ready when
//! the progress engine runs the completion that fulfils them, and
//! [`Future::wait`] drives that engine until they do.
//!
//! A ready future built with [`make_future`] stores its value inline and
//! allocates nothing. A pending future shares a reference-counted cell with
//! the [`Promise`] (or internal operation) that will fulfil it.
//!
//! # Continuations
//!
//! [`Future::then`] never runs the continuation in the frame that readies
//! the source. The continuation is bound to the persona that was current
//! when `then` was called, and is queued onto that persona's user mailbox
//! once the source is ready. If the continuation returns another future the
//! result is flattened (see [`Resolve`]).
//!
//! ```ignore
//! let doubled = rt.rpc(2, |x: i32| x + 1, 41).then(|x| x * 2);
//! assert_eq!(doubled.wait(), 84);
//! ```

mod cell;
mod promise;
mod when_all;

use std::fmt;
use std::sync::Arc;

pub(crate) use cell::FutureCell;
pub use promise::Promise;
pub use when_all::{when_all, when_all3, when_all4, when_all5, when_all_vec};

use crate::diagnostic::fatal;
use crate::inbox::ProgressLevel;

/// Values a future can carry.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

enum Repr<T> {
    Ready(T),
    Shared(Arc<FutureCell<T>>),
}

/// The eventual result of an asynchronous operation.
pub struct Future<T> {
    repr: Repr<T>,
}

/// Returns a future that is already ready with `value`.
#[must_use]
pub fn make_future<T: Value>(value: T) -> Future<T> {
    Future {
        repr: Repr::Ready(value),
    }
}

/// Blocks on `future`, driving progress until it is ready.
#[track_caller]
pub fn wait<T: Value>(future: Future<T>) -> T {
    future.wait()
}

pub(crate) fn unwrap_shared<T: Clone>(value: Arc<T>) -> T {
    Arc::try_unwrap(value).unwrap_or_else(|shared| T::clone(&shared))
}

impl<T: Value> Future<T> {
    pub(crate) fn from_cell(cell: Arc<FutureCell<T>>) -> Self {
        Self {
            repr: Repr::Shared(cell),
        }
    }

    /// Non-blocking readiness check with no side effects.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match &self.repr {
            Repr::Ready(_) => true,
            Repr::Shared(cell) => cell.is_ready(),
        }
    }

    /// Returns a clone of the value if the future is ready.
    #[must_use]
    pub fn try_result(&self) -> Option<T> {
        match &self.repr {
            Repr::Ready(value) => Some(value.clone()),
            Repr::Shared(cell) => cell.get().map(|value| T::clone(&value)),
        }
    }

    /// Returns the value of a ready future.
    ///
    /// Calling this on a pending future is a usage error.
    #[must_use]
    #[track_caller]
    pub fn result(&self) -> T {
        self.try_result()
            .unwrap_or_else(|| fatal("result() called on a future that is not ready"))
    }

    /// Drives user-level progress until the future is ready, then returns
    /// its value.
    ///
    /// Waiting from inside a progress callback on a future that is not ready
    /// can never succeed (nested progress calls do nothing) and is fatal.
    #[track_caller]
    pub fn wait(self) -> T {
        loop {
            if let Some(value) = self.try_result() {
                return value;
            }
            if crate::runtime::progress::in_progress() {
                fatal("wait() on a pending future from inside progress; it can never become ready");
            }
            crate::runtime::progress(ProgressLevel::User);
        }
    }

    /// Registers an internal callback for when the value is available.
    pub(crate) fn on_ready<F>(self, f: F)
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        match self.repr {
            Repr::Ready(value) => f(Arc::new(value)),
            Repr::Shared(cell) => cell.on_ready(Box::new(f)),
        }
    }

    /// Publishes this future's value into `target` once available.
    pub(crate) fn forward_to(self, target: Arc<FutureCell<T>>) {
        self.on_ready(move |value| target.fulfill(value));
    }

    /// Transforms the value synchronously on whichever thread readies it.
    /// Only for cheap, non-blocking crate-internal projections.
    pub(crate) fn map_now<U, F>(self, f: F) -> Future<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self.repr {
            Repr::Ready(value) => make_future(f(value)),
            Repr::Shared(cell) => {
                if let Some(value) = cell.get() {
                    return make_future(f(unwrap_shared(value)));
                }
                let out = FutureCell::pending();
                let target = Arc::clone(&out);
                cell.on_ready(Box::new(move |value| {
                    target.fulfill(Arc::new(f(unwrap_shared(value))));
                }));
                Future::from_cell(out)
            }
        }
    }

    /// Chains a continuation, flattening a returned future.
    ///
    /// The continuation runs exactly once, during a user-level progress call
    /// on the persona that is current now, after this future is ready.
    pub fn then<F, R>(self, f: F) -> Future<R::Value>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: Resolve,
    {
        let persona = crate::persona::current_persona();
        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        self.on_ready(move |value| {
            persona.enqueue(
                ProgressLevel::User,
                Box::new(move || f(unwrap_shared(value)).resolve().forward_to(target)),
            );
        });
        Future::from_cell(out)
    }

    /// Like [`then`](Self::then) for continuations returning a plain value of
    /// any type; the result is not flattened.
    pub fn map<F, U>(self, f: F) -> Future<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: Value,
    {
        self.then(move |value| make_future(f(value)))
    }
}

impl<T: Value> Clone for Future<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Ready(value) => Repr::Ready(value.clone()),
            Repr::Shared(cell) => Repr::Shared(Arc::clone(cell)),
        };
        Self { repr }
    }
}

impl<T: Value + fmt::Debug> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_result() {
            Some(value) => f.debug_tuple("Future::Ready").field(&value).finish(),
            None => f.write_str("Future::Pending"),
        }
    }
}

/// Conversion of a continuation's return value into a future.
///
/// Implemented for [`Future<T>`] (passed through, giving one level of
/// flattening) and for common plain value types (wrapped in a ready
/// future). Types without an impl can be returned from [`Future::map`], or
/// wrapped with [`make_future`].
pub trait Resolve: Send + 'static {
    /// The value type of the resulting future.
    type Value: Value;

    /// Converts `self` into a future.
    fn resolve(self) -> Future<Self::Value>;
}

impl<T: Value> Resolve for Future<T> {
    type Value = T;

    fn resolve(self) -> Self {
        self
    }
}

macro_rules! resolve_immediate {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Resolve for $ty {
                type Value = $ty;

                fn resolve(self) -> Future<$ty> {
                    make_future(self)
                }
            }
        )*
    };
}

resolve_immediate!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: Value> Resolve for Vec<T> {
    type Value = Self;

    fn resolve(self) -> Future<Self> {
        make_future(self)
    }
}

impl<T: Value> Resolve for Option<T> {
    type Value = Self;

    fn resolve(self) -> Future<Self> {
        make_future(self)
    }
}

impl<T: Send + Sync + 'static> Resolve for Arc<T> {
    type Value = Self;

    fn resolve(self) -> Future<Self> {
        make_future(self)
    }
}

macro_rules! resolve_tuple {
    ($($name:ident),+) => {
        impl<$($name: Value),+> Resolve for ($($name,)+) {
            type Value = Self;

            fn resolve(self) -> Future<Self> {
                make_future(self)
            }
        }
    };
}

resolve_tuple!(A, B);
resolve_tuple!(A, B, C);
resolve_tuple!(A, B, C, D);
