//! Allocation and one-sided transfers.
//!
//! Targets on the calling rank's node are read or written directly and the
//! returned future is already ready. Other targets go through the transport;
//! the completion is registered on the calling persona's handle-callback
//! queue and the future becomes ready during that persona's progress.

use std::mem::{align_of, size_of};
use std::sync::Arc;

use bytemuck::Pod;

use super::{AllocError, GlobalPtr, OperationCx, PutCompletions, RemoteCx};
use crate::diagnostic::fatal;
use crate::error::{Error, ErrorContext, Result};
use crate::future::{make_future, when_all_vec, Future, FutureCell, Value};
use crate::persona::current_persona;
use crate::runtime::Runtime;
use crate::tracing_compat::trace;
use crate::Rank;

impl Runtime {
    /// Allocates and initializes a `T` in this rank's segment.
    ///
    /// Exhausting the segment is fatal; see [`try_new_`](Self::try_new_).
    #[must_use]
    #[track_caller]
    pub fn new_<T: Pod>(&self, value: T) -> GlobalPtr<T> {
        self.try_new_(value)
            .unwrap_or_else(|e| fatal(format!("new_::<{}>: {e}", std::any::type_name::<T>())))
    }

    /// Fallible [`new_`](Self::new_).
    pub fn try_new_<T: Pod>(&self, value: T) -> Result<GlobalPtr<T>> {
        let ptr = self.allocate::<T>(1)?;
        self.segment().write(ptr.addr(), bytemuck::bytes_of(&value));
        Ok(ptr)
    }

    /// Allocates `count` zeroed elements in this rank's segment.
    ///
    /// Exhausting the segment is fatal; see
    /// [`try_new_array`](Self::try_new_array).
    #[must_use]
    #[track_caller]
    pub fn new_array<T: Pod>(&self, count: usize) -> GlobalPtr<T> {
        self.try_new_array(count).unwrap_or_else(|e| {
            fatal(format!(
                "new_array::<{}>({count}): {e}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Fallible [`new_array`](Self::new_array).
    pub fn try_new_array<T: Pod>(&self, count: usize) -> Result<GlobalPtr<T>> {
        let ptr = self.allocate::<T>(count)?;
        let len = byte_len::<T>(count);
        if len > 0 {
            self.segment().write(ptr.addr(), &vec![0; len]);
        }
        Ok(ptr)
    }

    /// Frees an object allocated with [`new_`](Self::new_).
    #[track_caller]
    pub fn delete<T>(&self, ptr: GlobalPtr<T>) {
        self.free(ptr, "delete");
    }

    /// Frees an array allocated with [`new_array`](Self::new_array).
    #[track_caller]
    pub fn delete_array<T>(&self, ptr: GlobalPtr<T>) {
        self.free(ptr, "delete_array");
    }

    fn allocate<T>(&self, count: usize) -> Result<GlobalPtr<T>> {
        self.ensure_live()?;
        let located =
            |e: AllocError| Error::from(e).with_context(ErrorContext::on_rank(self.rank_me()));
        let size = size_of::<T>().checked_mul(count).ok_or_else(|| {
            located(AllocError::Exhausted {
                size: usize::MAX,
                available: self.segment().available(),
            })
        })?;
        let addr = self
            .segment()
            .allocate(size, align_of::<T>())
            .map_err(located)?;
        trace!(rank = self.rank_me(), addr, size, "segment allocation");
        Ok(GlobalPtr::from_raw(
            self.rank_me(),
            addr,
            super::MemoryKind::Host,
        ))
    }

    #[track_caller]
    fn free<T>(&self, ptr: GlobalPtr<T>, op: &str) {
        if ptr.is_null() {
            return;
        }
        ptr.check_host(op);
        if ptr.rank() != self.rank_me() {
            fatal(format!("{op} of {ptr}, which rank {} does not own", self.rank_me()));
        }
        if let Err(e) = self.segment().deallocate(ptr.addr()) {
            fatal(format!("{op} of {ptr}: {e}"));
        }
    }

    /// Writes `value` to `dest`.
    #[track_caller]
    pub fn rput<T: Pod>(&self, value: T, dest: GlobalPtr<T>) -> Future<()> {
        dest.check_host("rput");
        self.put_bytes(dest.rank(), dest.addr(), bytemuck::bytes_of(&value).to_vec())
    }

    /// Reads the value at `src`.
    #[track_caller]
    pub fn rget<T: Pod + Value>(&self, src: GlobalPtr<T>) -> Future<T> {
        src.check_host("rget");
        self.get_bytes(src.rank(), src.addr(), size_of::<T>())
            .map_now(|bytes| bytemuck::pod_read_unaligned(&bytes))
    }

    /// Writes `value` to `dest`, reporting completion as `cxs` asks.
    ///
    /// Returns a future only when the operation completion was requested
    /// [as a future](OperationCx::as_future). A remote completion is sent to
    /// the target rank after the bytes have landed, so it observes them.
    #[track_caller]
    pub fn rput_with<T: Pod>(
        &self,
        value: T,
        dest: GlobalPtr<T>,
        cxs: impl Into<PutCompletions>,
    ) -> Option<Future<()>> {
        dest.check_host("rput_with");
        let mut cxs = cxs.into();
        let (future, on_done) = cxs.operation().start(false);
        let rank = dest.rank();
        let remote = cxs.remote.take().map(RemoteCx::into_fn);
        let weak = self.downgrade();
        self.put_bytes_then(
            rank,
            dest.addr(),
            bytemuck::bytes_of(&value).to_vec(),
            move || {
                if let Some(remote) = remote {
                    if let Some(rt) = Runtime::from_weak(&weak) {
                        trace!(from = rt.rank_me(), to = rank, "remote completion");
                        rt.rpc_ff(rank, move |()| remote(), ());
                    }
                }
                on_done(());
            },
        );
        future
    }

    /// Reads the value at `src`, reporting completion as `cx` asks. Returns
    /// a future only for [`OperationCx::as_future`].
    #[track_caller]
    pub fn rget_with<T: Pod + Value>(
        &self,
        src: GlobalPtr<T>,
        cx: OperationCx<T>,
    ) -> Option<Future<T>> {
        src.check_host("rget_with");
        let (future, on_done) = cx.start(true);
        self.get_bytes_then(src.rank(), src.addr(), size_of::<T>(), move |bytes| {
            on_done(bytemuck::pod_read_unaligned(&bytes));
        });
        future
    }

    /// Writes `values` to consecutive elements starting at `dest`.
    #[track_caller]
    pub fn rput_slice<T: Pod>(&self, values: &[T], dest: GlobalPtr<T>) -> Future<()> {
        dest.check_host("rput_slice");
        if values.is_empty() {
            return make_future(());
        }
        self.put_bytes(
            dest.rank(),
            dest.addr(),
            bytemuck::cast_slice::<T, u8>(values).to_vec(),
        )
    }

    /// Reads `count` consecutive elements starting at `src`.
    #[track_caller]
    pub fn rget_slice<T: Pod + Value>(&self, src: GlobalPtr<T>, count: usize) -> Future<Vec<T>> {
        src.check_host("rget_slice");
        if count == 0 {
            return make_future(Vec::new());
        }
        self.get_bytes(src.rank(), src.addr(), byte_len::<T>(count))
            .map_now(move |bytes| decode_slice(&bytes, count))
    }

    /// Writes an N-dimensional block.
    ///
    /// `extents[d]` elements are transferred along dimension `d`; dimension 0
    /// varies fastest. Strides are in elements: element `(i0, i1, ..)` is read
    /// from `src[sum(i_d * src_strides[d])]` and written to
    /// `dest + sum(i_d * dest_strides[d])`.
    #[track_caller]
    pub fn rput_strided<T: Pod>(
        &self,
        src: &[T],
        src_strides: &[usize],
        dest: GlobalPtr<T>,
        dest_strides: &[usize],
        extents: &[usize],
    ) -> Future<()> {
        dest.check_host("rput_strided");
        check_dims("rput_strided", extents, &[src_strides, dest_strides]);
        let row_len = extents.first().copied().unwrap_or(1);
        let src_step = src_strides.first().copied().unwrap_or(1);
        let dest_step = dest_strides.first().copied().unwrap_or(1);

        let mut pending = Vec::new();
        for (src_base, dest_base) in row_bases(extents, src_strides, dest_strides) {
            let row: Vec<T> = (0..row_len)
                .map(|i| {
                    let at = src_base + i * src_step;
                    *src.get(at).unwrap_or_else(|| {
                        fatal(format!(
                            "rput_strided reads element {at} of a {}-element source",
                            src.len()
                        ))
                    })
                })
                .collect();
            let row_dest = dest.add(dest_base);
            if dest_step == 1 {
                pending.push(self.rput_slice(&row, row_dest));
            } else {
                for (i, value) in row.into_iter().enumerate() {
                    pending.push(self.rput(value, row_dest.add(i * dest_step)));
                }
            }
        }
        when_all_vec(pending).map_now(|_| ())
    }

    /// Reads an N-dimensional block, packed with dimension 0 varying
    /// fastest. See [`rput_strided`](Self::rput_strided) for the layout.
    #[track_caller]
    pub fn rget_strided<T: Pod + Value>(
        &self,
        src: GlobalPtr<T>,
        src_strides: &[usize],
        extents: &[usize],
    ) -> Future<Vec<T>> {
        src.check_host("rget_strided");
        check_dims("rget_strided", extents, &[src_strides]);
        let row_len = extents.first().copied().unwrap_or(1);
        let step = src_strides.first().copied().unwrap_or(1);

        let rows: Vec<Future<Vec<T>>> = row_bases(extents, src_strides, src_strides)
            .into_iter()
            .map(|(base, _)| {
                let row_src = src.add(base);
                if step == 1 {
                    self.rget_slice(row_src, row_len)
                } else {
                    when_all_vec(
                        (0..row_len)
                            .map(|i| self.rget(row_src.add(i * step)))
                            .collect(),
                    )
                }
            })
            .collect();
        when_all_vec(rows).map_now(|rows| rows.into_iter().flatten().collect())
    }

    #[track_caller]
    fn put_bytes(&self, rank: Rank, addr: u64, bytes: Vec<u8>) -> Future<()> {
        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        self.put_bytes_then(rank, addr, bytes, move || target.fulfill(Arc::new(())));
        Future::from_cell(out)
    }

    #[track_caller]
    fn get_bytes(&self, rank: Rank, addr: u64, len: usize) -> Future<Vec<u8>> {
        let out = FutureCell::pending();
        let target = Arc::clone(&out);
        self.get_bytes_then(rank, addr, len, move |bytes| target.fulfill(Arc::new(bytes)));
        Future::from_cell(out)
    }

    /// Writes `bytes` and calls `done` once they are visible at the target:
    /// at once for a target on this node, otherwise from the calling
    /// persona's handle-callback queue.
    #[track_caller]
    fn put_bytes_then<F>(&self, rank: Rank, addr: u64, bytes: Vec<u8>, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.metrics().rma_ops.increment();
        if let Some(segment) = self.transport().segment(rank) {
            segment.write(addr, &bytes);
            done();
            return;
        }
        let handle = self
            .transport()
            .rma_put(rank, addr, bytes)
            .unwrap_or_else(|e| fatal(format!("rput to rank {rank}: {e}")));
        current_persona().handle_cbs().push(handle, move |_| done());
    }

    #[track_caller]
    fn get_bytes_then<F>(&self, rank: Rank, addr: u64, len: usize, done: F)
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        self.metrics().rma_ops.increment();
        if let Some(segment) = self.transport().segment(rank) {
            done(segment.read(addr, len));
            return;
        }
        let handle = self
            .transport()
            .rma_get(rank, addr, len)
            .unwrap_or_else(|e| fatal(format!("rget from rank {rank}: {e}")));
        current_persona()
            .handle_cbs()
            .push(handle, move |data| done(data.unwrap_or_default()));
    }
}

fn byte_len<T>(count: usize) -> usize {
    size_of::<T>().saturating_mul(count)
}

fn decode_slice<T: Pod>(bytes: &[u8], count: usize) -> Vec<T> {
    let size = size_of::<T>();
    if size == 0 {
        return vec![T::zeroed(); count];
    }
    bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[track_caller]
fn check_dims(op: &str, extents: &[usize], strides: &[&[usize]]) {
    if strides.iter().any(|s| s.len() != extents.len()) {
        fatal(format!(
            "{op}: {} extents but stride lists of lengths {:?}",
            extents.len(),
            strides.iter().map(|s| s.len()).collect::<Vec<_>>()
        ));
    }
}

/// Element offsets of the first element of every row (dimension 0 run), on
/// both sides of a strided transfer, in row-major order of dimensions 1..N.
fn row_bases(extents: &[usize], a: &[usize], b: &[usize]) -> Vec<(usize, usize)> {
    if extents.iter().any(|&e| e == 0) {
        return Vec::new();
    }
    let outer = extents.get(1..).unwrap_or(&[]);
    let mut index = vec![0_usize; outer.len()];
    let mut bases = Vec::new();
    loop {
        let offset = |strides: &[usize]| {
            index
                .iter()
                .zip(strides.iter().skip(1))
                .map(|(i, s)| i * s)
                .sum::<usize>()
        };
        bases.push((offset(a), offset(b)));

        let mut dim = 0;
        loop {
            if dim == outer.len() {
                return bases;
            }
            index[dim] += 1;
            if index[dim] < outer[dim] {
                break;
            }
            index[dim] = 0;
            dim += 1;
        }
    }
}
