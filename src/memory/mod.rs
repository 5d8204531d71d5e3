//! Global memory: shared segments, global pointers and one-sided transfers.
//!
//! Every rank owns a [`Segment`] of `segment_size` bytes. Objects allocated
//! there with [`Runtime::new_`](crate::Runtime::new_) or
//! [`Runtime::new_array`](crate::Runtime::new_array) are named by a
//! [`GlobalPtr`], which any rank may pass to `rput`/`rget` and their slice
//! and strided forms. Only plain-old-data types (`bytemuck::Pod`) live in
//! segments.
//!
//! The `_with` transfer forms take [`OperationCx`] and [`RemoteCx`]
//! completion requests; [`AtomicDomain`] performs atomic read-modify-write
//! operations on integers in any rank's segment.

mod atomic;
mod completion;
mod global_ptr;
mod rma;
mod segment;

pub use atomic::{AtomicDomain, AtomicOp, AtomicValue};
pub use completion::{OperationCx, PutCompletions, RemoteCx};
pub use global_ptr::{GlobalPtr, MemoryKind};
pub use segment::{AllocError, Segment, ALLOC_QUANTUM, SEGMENT_BASE};
