//! Atomic operations on values in shared segments.
//!
//! An [`AtomicDomain`] names the set of [`AtomicOp`]s it will be used for;
//! issuing an operation outside that set is a usage error. Every operation
//! is an indivisible read-modify-write of the target element with respect to
//! every other access to that segment, whichever rank issues it.
//!
//! Targets on the calling rank's node are updated in place and the returned
//! future is already ready. Other targets go through the transport's atomic
//! transfer, which needs no attention from the target rank; the future
//! becomes ready during the calling persona's progress.
//!
//! ```ignore
//! let ad = AtomicDomain::<u64>::new(&rt, &[AtomicOp::FetchAdd, AtomicOp::Load]);
//! let ticket = ad.fetch_add(counter, 1).wait();
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use super::GlobalPtr;
use crate::diagnostic::fatal;
use crate::future::{make_future, Future, FutureCell, Value};
use crate::persona::current_persona;
use crate::runtime::Runtime;
use crate::tracing_compat::trace;
use crate::transport::AtomicUpdate;

/// An atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    /// Read the value.
    Load,
    /// Replace the value.
    Store,
    /// Add an operand.
    Add,
    /// Add an operand, returning the prior value.
    FetchAdd,
    /// Subtract an operand.
    Sub,
    /// Subtract an operand, returning the prior value.
    FetchSub,
    /// Add one.
    Inc,
    /// Add one, returning the prior value.
    FetchInc,
    /// Subtract one.
    Dec,
    /// Subtract one, returning the prior value.
    FetchDec,
    /// Replace the value if it equals an expected one, returning the prior
    /// value.
    CompareExchange,
}

impl AtomicOp {
    const fn bit(self) -> u16 {
        1 << self as u16
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Store => "store",
            Self::Add => "add",
            Self::FetchAdd => "fetch_add",
            Self::Sub => "sub",
            Self::FetchSub => "fetch_sub",
            Self::Inc => "inc",
            Self::FetchInc => "fetch_inc",
            Self::Dec => "dec",
            Self::FetchDec => "fetch_dec",
            Self::CompareExchange => "compare_exchange",
        }
    }
}

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types an [`AtomicDomain`] can operate on.
pub trait AtomicValue: Pod + Value + PartialEq + fmt::Debug + sealed::Sealed {
    /// The value one.
    const ONE: Self;

    /// `self + rhs`, wrapping for integers.
    #[must_use]
    fn plus(self, rhs: Self) -> Self;

    /// `self - rhs`, wrapping for integers.
    #[must_use]
    fn minus(self, rhs: Self) -> Self;
}

macro_rules! atomic_int {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl AtomicValue for $ty {
                const ONE: Self = 1;

                fn plus(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                fn minus(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }
            }
        )*
    };
}

macro_rules! atomic_float {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl AtomicValue for $ty {
                const ONE: Self = 1.0;

                fn plus(self, rhs: Self) -> Self {
                    self + rhs
                }

                fn minus(self, rhs: Self) -> Self {
                    self - rhs
                }
            }
        )*
    };
}

atomic_int!(i32, u32, i64, u64);
atomic_float!(f32, f64);

/// A set of atomic operations on `T` usable against any rank's segment.
pub struct AtomicDomain<T> {
    rt: Runtime,
    ops: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T: AtomicValue> AtomicDomain<T> {
    /// Creates a domain supporting `ops`. An empty set is a usage error.
    #[must_use]
    #[track_caller]
    pub fn new(rt: &Runtime, ops: &[AtomicOp]) -> Self {
        if ops.is_empty() {
            fatal("an atomic domain needs at least one operation");
        }
        let ops = ops.iter().fold(0, |mask, op| mask | op.bit());
        trace!(
            rank = rt.rank_me(),
            ops,
            ty = std::any::type_name::<T>(),
            "atomic domain created"
        );
        Self {
            rt: rt.clone(),
            ops,
            _marker: PhantomData,
        }
    }

    /// Returns true if `op` may be issued through this domain.
    #[must_use]
    pub const fn supports(&self, op: AtomicOp) -> bool {
        self.ops & op.bit() != 0
    }

    /// Reads the value at `ptr`.
    #[track_caller]
    pub fn load(&self, ptr: GlobalPtr<T>) -> Future<T> {
        self.apply(AtomicOp::Load, ptr, |v| v)
    }

    /// Writes `value` to `ptr`.
    #[track_caller]
    pub fn store(&self, ptr: GlobalPtr<T>, value: T) -> Future<()> {
        self.apply(AtomicOp::Store, ptr, move |_| value).map_now(drop)
    }

    /// Adds `value` to the element at `ptr`.
    #[track_caller]
    pub fn add(&self, ptr: GlobalPtr<T>, value: T) -> Future<()> {
        self.apply(AtomicOp::Add, ptr, move |v| v.plus(value)).map_now(drop)
    }

    /// Adds `value` to the element at `ptr`, returning the prior value.
    #[track_caller]
    pub fn fetch_add(&self, ptr: GlobalPtr<T>, value: T) -> Future<T> {
        self.apply(AtomicOp::FetchAdd, ptr, move |v| v.plus(value))
    }

    /// Subtracts `value` from the element at `ptr`.
    #[track_caller]
    pub fn sub(&self, ptr: GlobalPtr<T>, value: T) -> Future<()> {
        self.apply(AtomicOp::Sub, ptr, move |v| v.minus(value)).map_now(drop)
    }

    /// Subtracts `value` from the element at `ptr`, returning the prior
    /// value.
    #[track_caller]
    pub fn fetch_sub(&self, ptr: GlobalPtr<T>, value: T) -> Future<T> {
        self.apply(AtomicOp::FetchSub, ptr, move |v| v.minus(value))
    }

    /// Adds one to the element at `ptr`.
    #[track_caller]
    pub fn inc(&self, ptr: GlobalPtr<T>) -> Future<()> {
        self.apply(AtomicOp::Inc, ptr, |v| v.plus(T::ONE)).map_now(drop)
    }

    /// Adds one to the element at `ptr`, returning the prior value.
    #[track_caller]
    pub fn fetch_inc(&self, ptr: GlobalPtr<T>) -> Future<T> {
        self.apply(AtomicOp::FetchInc, ptr, |v| v.plus(T::ONE))
    }

    /// Subtracts one from the element at `ptr`.
    #[track_caller]
    pub fn dec(&self, ptr: GlobalPtr<T>) -> Future<()> {
        self.apply(AtomicOp::Dec, ptr, |v| v.minus(T::ONE)).map_now(drop)
    }

    /// Subtracts one from the element at `ptr`, returning the prior value.
    #[track_caller]
    pub fn fetch_dec(&self, ptr: GlobalPtr<T>) -> Future<T> {
        self.apply(AtomicOp::FetchDec, ptr, |v| v.minus(T::ONE))
    }

    /// Stores `new` at `ptr` if the element equals `current`. Returns the
    /// prior value; the exchange happened if it equals `current`.
    #[track_caller]
    pub fn compare_exchange(&self, ptr: GlobalPtr<T>, current: T, new: T) -> Future<T> {
        self.apply(AtomicOp::CompareExchange, ptr, move |v| {
            if v == current {
                new
            } else {
                v
            }
        })
    }

    #[track_caller]
    fn apply<F>(&self, op: AtomicOp, ptr: GlobalPtr<T>, f: F) -> Future<T>
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        if !self.supports(op) {
            fatal(format!("atomic operation {op} is not in this domain"));
        }
        ptr.check_host(op.name());
        let rt = &self.rt;
        rt.metrics().rma_ops.increment();
        let update: AtomicUpdate = Box::new(move |old: &[u8]| {
            let new = f(bytemuck::pod_read_unaligned(old));
            bytemuck::bytes_of(&new).to_vec()
        });
        let (rank, addr, len) = (ptr.rank(), ptr.addr(), size_of::<T>());

        if let Some(segment) = rt.transport().segment(rank) {
            let old = segment.update(addr, len, update);
            return make_future(bytemuck::pod_read_unaligned(&old));
        }
        let handle = rt
            .transport()
            .rma_atomic(rank, addr, len, update)
            .unwrap_or_else(|e| fatal(format!("atomic {op} on rank {rank}: {e}")));
        trace!(from = rt.rank_me(), to = rank, %op, "atomic issued");
        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        current_persona().handle_cbs().push(handle, move |data| {
            let old = data.map_or_else(T::zeroed, |bytes| bytemuck::pod_read_unaligned(&bytes));
            target.fulfill(Arc::new(old));
        });
        Future::from_cell(out)
    }
}

impl<T> fmt::Debug for AtomicDomain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicDomain")
            .field("rank", &self.rt.rank_me())
            .field("ops", &format_args!("{:#06x}", self.ops))
            .finish()
    }
}
