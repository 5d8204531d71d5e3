//! Typed pointers into any rank's shared segment.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

use crate::diagnostic::fatal;
use crate::runtime::Runtime;
use crate::Rank;

/// Where the memory behind a pointer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryKind {
    /// Host memory in a rank's shared segment.
    #[default]
    Host,
    /// Memory of an accelerator device, identified by its index.
    Device(u32),
}

/// A pointer to a `T` that may live on another rank.
///
/// Equality, ordering and hashing use `(rank, addr)` only. Arithmetic moves
/// in units of `T`.
pub struct GlobalPtr<T> {
    rank: Rank,
    addr: u64,
    kind: MemoryKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> GlobalPtr<T> {
    /// The null pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            rank: 0,
            addr: 0,
            kind: MemoryKind::Host,
            _marker: PhantomData,
        }
    }

    /// Builds a pointer from its parts, for memory handed out by an external
    /// allocator.
    #[must_use]
    pub const fn from_raw(rank: Rank, addr: u64, kind: MemoryKind) -> Self {
        Self {
            rank,
            addr,
            kind,
            _marker: PhantomData,
        }
    }

    /// Rank owning the memory.
    #[must_use]
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    /// Raw segment address.
    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    /// Memory kind tag.
    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Returns true for the null pointer.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.addr == 0
    }

    /// Returns true if the calling rank can access the memory directly.
    #[must_use]
    pub fn is_local(&self) -> bool {
        !self.is_null() && Runtime::current().transport().is_local(self.rank)
    }

    /// Pointer `n` elements further.
    #[must_use]
    #[track_caller]
    pub fn add(self, n: usize) -> Self {
        let bytes = (n as u64)
            .checked_mul(size_of::<T>() as u64)
            .and_then(|delta| self.addr.checked_add(delta))
            .unwrap_or_else(|| fatal(format!("{self} + {n} overflows")));
        Self { addr: bytes, ..self }
    }

    /// Pointer `n` elements back.
    #[must_use]
    #[track_caller]
    pub fn sub(self, n: usize) -> Self {
        let bytes = (n as u64)
            .checked_mul(size_of::<T>() as u64)
            .and_then(|delta| self.addr.checked_sub(delta))
            .unwrap_or_else(|| fatal(format!("{self} - {n} underflows")));
        Self { addr: bytes, ..self }
    }

    /// Element distance from `origin` to `self`. Both must point into the
    /// same rank's memory.
    #[must_use]
    #[track_caller]
    pub fn offset_from(self, origin: Self) -> isize {
        if self.rank != origin.rank || self.kind != origin.kind {
            fatal(format!("offset_from between {self} and {origin}, which live in different memories"));
        }
        let size = size_of::<T>().max(1) as i128;
        let delta = i128::from(self.addr) - i128::from(origin.addr);
        isize::try_from(delta / size)
            .unwrap_or_else(|_| fatal(format!("offset between {self} and {origin} overflows")))
    }

    /// Reinterprets the pointee type.
    #[must_use]
    pub const fn cast<U>(self) -> GlobalPtr<U> {
        GlobalPtr {
            rank: self.rank,
            addr: self.addr,
            kind: self.kind,
            _marker: PhantomData,
        }
    }

    #[track_caller]
    pub(crate) fn check_host(&self, op: &str) {
        if self.is_null() {
            fatal(format!("{op} through a null global pointer"));
        }
        if let MemoryKind::Device(device) = self.kind {
            fatal(format!(
                "{op} on {self}: memory of device {device} cannot be accessed from the host"
            ));
        }
    }
}

impl<T: Pod> GlobalPtr<T> {
    /// Reads the pointee directly. The memory must be local.
    #[must_use]
    #[track_caller]
    pub fn local_read(&self) -> T {
        self.check_host("local_read");
        let segment = Runtime::current().local_segment_of(self.rank);
        bytemuck::pod_read_unaligned(&segment.read(self.addr, size_of::<T>()))
    }

    /// Writes the pointee directly. The memory must be local.
    #[track_caller]
    pub fn local_write(&self, value: T) {
        self.check_host("local_write");
        let segment = Runtime::current().local_segment_of(self.rank);
        segment.write(self.addr, bytemuck::bytes_of(&value));
    }
}

impl<T> Clone for GlobalPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GlobalPtr<T> {}

impl<T> Default for GlobalPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for GlobalPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.addr == other.addr
    }
}

impl<T> Eq for GlobalPtr<T> {}

impl<T> PartialOrd for GlobalPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for GlobalPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank, self.addr).cmp(&(other.rank, other.addr))
    }
}

impl<T> Hash for GlobalPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank.hash(state);
        self.addr.hash(state);
    }
}

impl<T> fmt::Display for GlobalPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(gp: {}, {:#x}", self.rank, self.addr)?;
        if let MemoryKind::Device(device) = self.kind {
            write!(f, ", device {device}")?;
        }
        f.write_str(")")
    }
}

impl<T> fmt::Debug for GlobalPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalPtr")
            .field("rank", &self.rank)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn arithmetic_moves_by_element() {
        let p = GlobalPtr::<u32>::from_raw(1, 0x100, MemoryKind::Host);
        let q = p.add(3);
        assert_eq!(q.addr(), 0x10c);
        assert_eq!(q.offset_from(p), 3);
        assert_eq!(p.offset_from(q), -3);
        assert_eq!(q.sub(3), p);
        assert_eq!(p.cast::<u8>().add(3).addr(), 0x103);
    }

    #[test]
    fn comparison_uses_rank_then_addr() {
        let a = GlobalPtr::<u64>::from_raw(0, 0x900, MemoryKind::Host);
        let b = GlobalPtr::<u64>::from_raw(1, 0x100, MemoryKind::Host);
        let c = GlobalPtr::<u64>::from_raw(1, 0x100, MemoryKind::Device(0));
        assert!(a < b);
        assert_eq!(b, c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn null_and_display() {
        let null = GlobalPtr::<u8>::null();
        assert!(null.is_null());
        assert_eq!(null, GlobalPtr::default());
        let p = GlobalPtr::<u8>::from_raw(2, 0x40, MemoryKind::Host);
        assert_eq!(p.to_string(), "(gp: 2, 0x40)");
        let d = GlobalPtr::<u8>::from_raw(2, 0x40, MemoryKind::Device(1));
        assert_eq!(d.to_string(), "(gp: 2, 0x40, device 1)");
    }

    #[test]
    #[should_panic(expected = "different memories")]
    fn offset_across_ranks_is_fatal() {
        crate::test_utils::init_test_logging();
        let a = GlobalPtr::<u8>::from_raw(0, 0x40, MemoryKind::Host);
        let b = GlobalPtr::<u8>::from_raw(1, 0x40, MemoryKind::Host);
        let _ = a.offset_from(b);
    }

    #[test]
    #[should_panic(expected = "cannot be accessed from the host")]
    fn device_access_is_fatal() {
        crate::test_utils::init_test_logging();
        let d = GlobalPtr::<u32>::from_raw(0, 0x40, MemoryKind::Device(0));
        let _ = d.local_read();
    }
}
