//! Conjunction of futures.
//!
//! The combined future is ready exactly when every input is, and carries the
//! inputs' values in argument order. Inputs may become ready in any order
//! and on any thread; each arrival stores its value under a small lock and
//! the last arrival publishes the tuple after releasing it. When every input
//! is already ready the result is an inline ready future.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{make_future, unwrap_shared, Future, FutureCell, Value};

struct Join2<A, B> {
    slots: Mutex<(Option<Arc<A>>, Option<Arc<B>>)>,
    out: Arc<FutureCell<(A, B)>>,
}

fn take_pair<A: Clone, B: Clone>(slots: &mut (Option<Arc<A>>, Option<Arc<B>>)) -> Option<(A, B)> {
    if slots.0.is_some() && slots.1.is_some() {
        let a = slots.0.take().map(unwrap_shared)?;
        let b = slots.1.take().map(unwrap_shared)?;
        return Some((a, b));
    }
    None
}

/// Combines two futures into a future of both values.
#[must_use]
pub fn when_all<A: Value, B: Value>(a: Future<A>, b: Future<B>) -> Future<(A, B)> {
    if let (Some(x), Some(y)) = (a.try_result(), b.try_result()) {
        return make_future((x, y));
    }

    let join = Arc::new(Join2 {
        slots: Mutex::new((None, None)),
        out: FutureCell::pending(),
    });

    let left = Arc::clone(&join);
    a.on_ready(move |value| {
        let done = {
            let mut slots = left.slots.lock();
            slots.0 = Some(value);
            take_pair(&mut slots)
        };
        if let Some(pair) = done {
            left.out.fulfill(Arc::new(pair));
        }
    });

    let right = Arc::clone(&join);
    b.on_ready(move |value| {
        let done = {
            let mut slots = right.slots.lock();
            slots.1 = Some(value);
            take_pair(&mut slots)
        };
        if let Some(pair) = done {
            right.out.fulfill(Arc::new(pair));
        }
    });

    Future::from_cell(Arc::clone(&join.out))
}

/// Three-way [`when_all`].
#[must_use]
pub fn when_all3<A: Value, B: Value, C: Value>(
    a: Future<A>,
    b: Future<B>,
    c: Future<C>,
) -> Future<(A, B, C)> {
    when_all(when_all(a, b), c).map_now(|((a, b), c)| (a, b, c))
}

/// Four-way [`when_all`].
#[must_use]
pub fn when_all4<A: Value, B: Value, C: Value, D: Value>(
    a: Future<A>,
    b: Future<B>,
    c: Future<C>,
    d: Future<D>,
) -> Future<(A, B, C, D)> {
    when_all(when_all(a, b), when_all(c, d)).map_now(|((a, b), (c, d))| (a, b, c, d))
}

/// Five-way [`when_all`].
#[must_use]
pub fn when_all5<A: Value, B: Value, C: Value, D: Value, E: Value>(
    a: Future<A>,
    b: Future<B>,
    c: Future<C>,
    d: Future<D>,
    e: Future<E>,
) -> Future<(A, B, C, D, E)> {
    when_all(when_all4(a, b, c, d), e).map_now(|((a, b, c, d), e)| (a, b, c, d, e))
}

/// Combines any number of futures of one type, preserving input order.
#[must_use]
pub fn when_all_vec<T: Value>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    if futures.iter().all(Future::is_ready) {
        let values: Option<Vec<T>> = futures.iter().map(Future::try_result).collect();
        if let Some(values) = values {
            return make_future(values);
        }
    }

    struct JoinAll<T> {
        slots: Mutex<Vec<Option<Arc<T>>>>,
        remaining: AtomicUsize,
        out: Arc<FutureCell<Vec<T>>>,
    }

    let join = Arc::new(JoinAll {
        slots: Mutex::new(vec![None; futures.len()]),
        remaining: AtomicUsize::new(futures.len()),
        out: FutureCell::pending(),
    });
    let out = Future::from_cell(Arc::clone(&join.out));

    for (index, future) in futures.into_iter().enumerate() {
        let join = Arc::clone(&join);
        future.on_ready(move |value| {
            join.slots.lock()[index] = Some(value);
            if join.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let values: Vec<T> = std::mem::take(&mut *join.slots.lock())
                    .into_iter()
                    .flatten()
                    .map(unwrap_shared)
                    .collect();
                join.out.fulfill(Arc::new(values));
            }
        });
    }
    out
}

/// Combines futures into one future of a tuple of their values.
///
/// ```ignore
/// let all = when_all!(f1, f2, f3);
/// let (a, b, c) = all.wait();
/// ```
#[macro_export]
macro_rules! when_all {
    ($a:expr $(,)?) => {
        $a
    };
    ($a:expr, $b:expr $(,)?) => {
        $crate::future::when_all($a, $b)
    };
    ($a:expr, $b:expr, $c:expr $(,)?) => {
        $crate::future::when_all3($a, $b, $c)
    };
    ($a:expr, $b:expr, $c:expr, $d:expr $(,)?) => {
        $crate::future::when_all4($a, $b, $c, $d)
    };
    ($a:expr, $b:expr, $c:expr, $d:expr, $e:expr $(,)?) => {
        $crate::future::when_all5($a, $b, $c, $d, $e)
    };
}
