use thiserror::Error;

/// Everything that can go wrong when allocating, freeing, or checking a heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AllocErr {
    /// The heap source refused to grow.
    #[error("out of memory: the heap could not grow by {request} bytes")]
    OutOfMemory {
        /// The number of bytes the allocator asked the heap source for.
        request: usize,
    },

    /// A size computation wrapped around, e.g. `count * size` in `calloc`.
    #[error("requested size overflows usize")]
    SizeOverflow,

    /// The pointer does not name a live allocation of this heap.
    #[error("offset {offset:#x} is not a live allocation")]
    InvalidPointer {
        /// The offending payload offset.
        offset: usize,
    },

    /// The pointer names a block that is already free.
    #[error("offset {offset:#x} was already freed")]
    DoubleFree {
        /// The offending payload offset.
        offset: usize,
    },

    /// The heap validator found a broken invariant. Continuing to use the
    /// heap is unsafe.
    #[error("heap is corrupt at offset {offset:#x}: {reason}")]
    CorruptHeap {
        /// Where the violation was found.
        offset: usize,
        /// Which invariant was violated.
        reason: &'static str,
    },

    /// `init` has not (successfully) been called yet.
    #[error("allocator used before a successful init")]
    Uninitialized,

    /// Backing memory could not be reserved from the operating system.
    #[error("could not map {request} bytes of backing memory")]
    MapFailed {
        /// The size of the failed reservation.
        request: usize,
    },
}
