//! Per-rank shared segment and its allocator.
//!
//! Addresses are byte offsets into the segment shifted by [`SEGMENT_BASE`],
//! so address 0 is never handed out and can serve as the null pointer. The
//! allocator is first-fit over a free list ordered by address; freeing
//! coalesces with both neighbors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

use crate::diagnostic::fatal;
use crate::Rank;

/// Address of the first byte of every segment.
pub const SEGMENT_BASE: u64 = 64;

/// Allocation granularity in bytes.
pub const ALLOC_QUANTUM: u64 = 8;

/// Segment allocation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No free block is large enough.
    #[error("segment exhausted: requested {size} bytes, {available} bytes free")]
    Exhausted {
        /// Requested bytes.
        size: usize,
        /// Total free bytes (possibly fragmented).
        available: usize,
    },

    /// Alignment is zero or not a power of two.
    #[error("invalid alignment {0}")]
    BadAlignment(usize),

    /// The address was not returned by this segment's allocator.
    #[error("address {0:#x} is not an allocation of this segment")]
    UnknownAddress(u64),
}

#[derive(Default)]
struct Allocator {
    /// Free blocks: start address to length.
    free: BTreeMap<u64, u64>,
    /// Live allocations: start address to length.
    live: HashMap<u64, u64>,
}

impl Allocator {
    fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    fn insert_free(&mut self, mut start: u64, mut len: u64) {
        if let Some((&prev_start, &prev_len)) = self.free.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        if let Some(&next_len) = self.free.get(&(start + len)) {
            self.free.remove(&(start + len));
            len += next_len;
        }
        self.free.insert(start, len);
    }
}

/// A rank's shared memory segment.
pub struct Segment {
    rank: Rank,
    size: u64,
    bytes: Mutex<Vec<u8>>,
    alloc: Mutex<Allocator>,
}

impl Segment {
    /// Creates a zeroed segment of `size` bytes owned by `rank`.
    #[must_use]
    pub fn new(rank: Rank, size: usize) -> Self {
        let size = size as u64;
        let mut alloc = Allocator::default();
        if size > 0 {
            alloc.free.insert(SEGMENT_BASE, size);
        }
        Self {
            rank,
            size,
            bytes: Mutex::new(vec![0; usize::try_from(size).unwrap_or(0)]),
            alloc: Mutex::new(alloc),
        }
    }

    /// Owning rank.
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        usize::try_from(self.size).unwrap_or(usize::MAX)
    }

    /// Free bytes, possibly fragmented.
    #[must_use]
    pub fn available(&self) -> usize {
        usize::try_from(self.alloc.lock().free_bytes()).unwrap_or(usize::MAX)
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.alloc.lock().live.len()
    }

    /// Allocates `size` bytes aligned to `align`. Zero-byte requests still
    /// receive a distinct address.
    pub fn allocate(&self, size: usize, align: usize) -> Result<u64, AllocError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(AllocError::BadAlignment(align));
        }
        let align = (align as u64).max(ALLOC_QUANTUM);
        let mut alloc = self.alloc.lock();
        let exhausted = |alloc: &Allocator| AllocError::Exhausted {
            size,
            available: usize::try_from(alloc.free_bytes()).unwrap_or(usize::MAX),
        };
        let Some(len) = round_up((size as u64).max(1), ALLOC_QUANTUM) else {
            return Err(exhausted(&*alloc));
        };

        let found = alloc.free.iter().find_map(|(&start, &block)| {
            let aligned = round_up(start, align)?;
            let end = aligned.checked_add(len)?;
            (end <= start + block).then_some((start, block, aligned))
        });
        let Some((start, block, aligned)) = found else {
            return Err(exhausted(&*alloc));
        };

        alloc.free.remove(&start);
        if aligned > start {
            alloc.free.insert(start, aligned - start);
        }
        let tail = start + block - (aligned + len);
        if tail > 0 {
            alloc.free.insert(aligned + len, tail);
        }
        alloc.live.insert(aligned, len);
        Ok(aligned)
    }

    /// Returns an allocation to the free list.
    pub fn deallocate(&self, addr: u64) -> Result<(), AllocError> {
        let mut alloc = self.alloc.lock();
        let len = alloc
            .live
            .remove(&addr)
            .ok_or(AllocError::UnknownAddress(addr))?;
        alloc.insert_free(addr, len);
        Ok(())
    }

    /// Returns true if `[addr, addr + len)` lies inside the segment.
    #[must_use]
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= SEGMENT_BASE
            && (addr - SEGMENT_BASE)
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.size)
    }

    /// Copies `len` bytes out of the segment.
    #[must_use]
    #[track_caller]
    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let offset = self.offset(addr, len);
        self.bytes.lock()[offset..offset + len].to_vec()
    }

    /// Copies `data` into the segment.
    #[track_caller]
    pub fn write(&self, addr: u64, data: &[u8]) {
        let offset = self.offset(addr, data.len());
        self.bytes.lock()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Replaces `len` bytes at `addr` with `f(current)`, returning the old
    /// bytes. No other access to the segment interleaves with the update.
    #[track_caller]
    pub fn update<F>(&self, addr: u64, len: usize, f: F) -> Vec<u8>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let offset = self.offset(addr, len);
        let mut bytes = self.bytes.lock();
        let window = &mut bytes[offset..offset + len];
        let old = window.to_vec();
        let new = f(&old);
        if new.len() != len {
            fatal(format!("segment update of {len} bytes produced {}", new.len()));
        }
        window.copy_from_slice(&new);
        old
    }

    #[track_caller]
    fn offset(&self, addr: u64, len: usize) -> usize {
        if !self.contains(addr, len) {
            fatal(format!(
                "access at {addr:#x}+{len} outside the segment of rank {}",
                self.rank
            ));
        }
        usize::try_from(addr - SEGMENT_BASE)
            .unwrap_or_else(|_| fatal(format!("segment offset {addr:#x} overflows")))
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// `value` rounded up to a multiple of `to`, or `None` past `u64::MAX`.
const fn round_up(value: u64, to: u64) -> Option<u64> {
    value.checked_next_multiple_of(to)
}
