/*!

`seg_alloc`: a **seg**regated free-list allocator.

`seg_alloc` manages one contiguous, growable heap region handed to it by a
[`HeapSource`] (think `sbrk`), and implements the classic `malloc` family on
top of it: [`init`], [`alloc`], [`free`], [`realloc`] and [`calloc`]. All of its
bookkeeping lives in-band, in header and footer words embedded in the managed
bytes. Outside the heap there are only a dozen free list heads and a bitmap of
where the allocated blocks start, which is what pointers passed to [`free`] and
[`realloc`] are checked against.

- **Segregated fits:** free blocks are kept in twelve doubly-linked lists by
  power-of-two size class, so finding a fit only ever looks at blocks that can
  plausibly satisfy the request, and unlinking a block is *O(1)*.

- **Immediate coalescing:** freeing a block merges it with its free physical
  neighbors right away, using boundary tags. There are never two adjacent free
  blocks in the heap.

- **Explicit context:** an allocator is a plain [`SegAlloc`] value that owns its
  heap source. There is no global state, so tests can create as many
  independent heaps as they like.

[`init`]: SegAlloc::init
[`alloc`]: SegAlloc::alloc
[`free`]: SegAlloc::free
[`realloc`]: SegAlloc::realloc
[`calloc`]: SegAlloc::calloc

- [Usage](#usage)
- [`cargo` Features](#cargo-features)
- [Implementation Notes and Constraints](#implementation-notes-and-constraints)
- [License](#license)

## Usage

Payloads are handed out as [`Payload`] offsets from the start of the heap, and
their bytes are reachable through [`SegAlloc::payload`] and
[`SegAlloc::payload_mut`]:

```
use seg_alloc::{Config, SegAlloc, VecHeap};

# fn main() -> Result<(), seg_alloc::AllocErr> {
let mut heap = SegAlloc::new(VecHeap::new(), Config::new());
heap.init()?;

let p = heap.alloc(24)?.expect("non-zero sizes always get a payload");
assert_eq!(p.offset() % 16, 0);
heap.payload_mut(p)?[..5].copy_from_slice(b"hello");

let p = heap.realloc(Some(p), 1000)?.expect("non-zero size");
assert_eq!(&heap.payload(p)?[..5], b"hello");

heap.free(Some(p))?;
heap.check_heap()?;
# Ok(())
# }
```

To share one allocator between threads, wrap it in a [`LockedSegAlloc`].

## `cargo` Features

- **extra_assertions**: Enable various extra, expensive integrity assertions and
  defensive mechanisms, such as poisoning freed memory and validating the whole
  heap after every operation. This incurs a large runtime overhead. It is
  useful when debugging a use-after-free or `seg_alloc` itself.

- **vec_backend**: Make [`DefaultHeap`] a [`VecHeap`] even on unix, where it is
  an `mmap` backed [`MmapHeap`] otherwise.

The default heap size limit of both backends is read from the
`SEG_ALLOC_MAX_HEAP_BYTES` environment variable at build time, and is 32 MiB
when that is unset.

## Implementation Notes and Constraints

- Every payload is 16-byte aligned. Blocks are multiples of 16 bytes and at
  least 32 bytes large.

- An allocated block carries one word of overhead, its header. A free block
  also keeps a footer, a copy of its header in its last word, so that the
  block after it can find it when coalescing backwards. A bit in each header
  records whether the previous block is allocated, which is what lets
  allocated blocks do without a footer.

- Allocation scans the free lists from the request's size class upward and
  takes the best fit in the first class that has one (or the first fit, see
  [`FitPolicy`]). When nothing fits, the heap grows by at least
  [`Config::chunk_size`] bytes.

- Deallocation is an *O(1)* operation.

- `seg_alloc` never returns memory to its heap source. The heap only grows.

- The core is single-threaded. [`LockedSegAlloc`] puts one spin lock around
  the whole allocator.

Here is a diagram giving an overview of `seg_alloc`'s implementation:

```text
+------------------------------------------------------------------------------+
| Heap Source (`VecHeap`, `MmapHeap`, ...)                                     |
+------------------------------------------------------------------------------+
                   |
                   | grow(n), at least `chunk_size` bytes at a time
                   |
                   V
+------------------------------------------------------------------------------+
| Heap                                                                         |
|                                                                              |
|  +-----+--------+--------+--------+--------+-----     -----+----------+      |
|  | pad | block  | block  | block  | block  |    ...        | epilogue |      |
|  +-----+--------+--------+--------+--------+-----     -----+----------+      |
|                                                                              |
+------------------------------------------------------------------------------+
           ^                  |                ^
           | split / merge    | free blocks    | free blocks
           |                  V                |
+------------------------------------------------------------------------------+
| Size Classes                                                                 |
|                                                                              |
|                  +-------+     +-------+                                     |
| Head(<= 32)  --> | Block | <-> | Block | <-> ...                             |
|                  +-------+     +-------+                                     |
|                  +-------+                                                   |
| Head(<= 64)  --> | Block | <-> ...                                           |
|                  +-------+                                                   |
| ...                                                                          |
|                  +-------+     +-------+                                     |
| Head(large)  --> | Block | <-> | Block | <-> ...                             |
|                  +-------+     +-------+                                     |
|                                                                              |
+------------------------------------------------------------------------------+
                      |            ^
          alloc /     |            |  free /
          realloc     |            |  realloc
                      V            |
+------------------------------------------------------------------------------+
| User Application                                                             |
+------------------------------------------------------------------------------+
```

## License

Licensed under the [Mozilla Public License 2.0](https://www.mozilla.org/en-US/MPL/2.0/).

 */

#![deny(missing_docs)]

#[macro_use]
mod extra_assert;

mod block;
mod block_starts;
mod check;
mod config;
mod error;
mod exclusive;
mod imp_vec;
mod size_classes;

#[cfg(unix)]
mod imp_unix;

pub use crate::block::{round_up, Payload, ALIGNMENT, MIN_BLOCK_SIZE, WORD};
pub use crate::check::HeapStats;
pub use crate::config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEAP_BYTES};
pub use crate::error::AllocErr;
pub use crate::exclusive::LockedSegAlloc;
#[cfg(unix)]
pub use crate::imp_unix::MmapHeap;
pub use crate::imp_vec::VecHeap;
pub use crate::size_classes::{FitPolicy, NUM_SIZE_CLASSES};
pub use memory_units::Bytes;

use crate::block::{
    align_up, assert_is_poisoned_with_free_pattern, mark_free, read_word, write_word, Block,
    FreeBlock, Header, FIRST_BLOCK, PADDING,
};
use crate::block_starts::BlockStarts;
use crate::check::assert_heap_is_valid;
use crate::size_classes::SizeClasses;
use core::cmp;

cfg_if::cfg_if! {
    if #[cfg(all(unix, not(feature = "vec_backend")))] {
        /// The heap source to use when there is no reason to pick one: an
        /// `MmapHeap` on unix, unless the `vec_backend` feature is enabled.
        pub type DefaultHeap = MmapHeap;

        /// Create a `DefaultHeap` limited to `DEFAULT_MAX_HEAP_BYTES`.
        pub fn default_heap() -> Result<DefaultHeap, AllocErr> {
            MmapHeap::new()
        }
    } else {
        /// The heap source to use when there is no reason to pick one: a
        /// `VecHeap`, since the `vec_backend` feature is enabled or this is not
        /// a unix target.
        pub type DefaultHeap = VecHeap;

        /// Create a `DefaultHeap` limited to `DEFAULT_MAX_HEAP_BYTES`.
        pub fn default_heap() -> Result<DefaultHeap, AllocErr> {
            Ok(VecHeap::new())
        }
    }
}

/// Where the allocator gets its memory from: one contiguous byte region that
/// can only grow at its end.
///
/// The allocator addresses the region by offset, and never touches anything
/// outside of `memory()`.
pub trait HeapSource {
    /// Extend the region by `increment` bytes, returning the previous size,
    /// which is the offset of the first new byte. The new bytes must directly
    /// follow the old ones.
    ///
    /// On failure the region must be left exactly as it was.
    fn grow(&mut self, increment: Bytes) -> Result<usize, AllocErr>;

    /// The current size of the region.
    fn heap_size(&self) -> Bytes;

    /// The region's bytes.
    fn memory(&self) -> &[u8];

    /// The region's bytes, mutably.
    fn memory_mut(&mut self) -> &mut [u8];

    /// The offset of the region's first byte. Always zero, since the region
    /// is addressed relative to its own start.
    fn heap_low(&self) -> usize {
        0
    }

    /// One past the offset of the region's last byte.
    fn heap_high(&self) -> usize {
        self.heap_low() + self.heap_size().0
    }
}

/// A segregated free-list allocator managing the memory of one `HeapSource`.
///
/// Every operation other than `new` requires a successful `init` first, and
/// fails with `AllocErr::Uninitialized` otherwise.
pub struct SegAlloc<H> {
    heap: H,
    classes: SizeClasses,
    starts: BlockStarts,
    config: Config,
    initialized: bool,
}

impl<H> SegAlloc<H> {
    /// Create an allocator for `heap`. This does not touch the heap; call
    /// `init` before using it.
    pub const fn new(heap: H, config: Config) -> SegAlloc<H> {
        SegAlloc {
            heap,
            classes: SizeClasses::new(),
            starts: BlockStarts::new(),
            config,
            initialized: false,
        }
    }

    /// The underlying heap source.
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// This allocator's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether `init` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give up the allocator and get its heap source back.
    pub fn into_heap(self) -> H {
        self.heap
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), AllocErr> {
        if self.initialized {
            Ok(())
        } else {
            Err(AllocErr::Uninitialized)
        }
    }
}

impl<H: HeapSource> SegAlloc<H> {
    /// Set up an empty heap.
    ///
    /// On a fresh heap source this writes the padding word and the epilogue.
    /// Calling it again discards every allocation: the region between the
    /// padding and the epilogue becomes a single free block.
    ///
    /// If this fails the allocator stays unusable until a later `init`
    /// succeeds.
    pub fn init(&mut self) -> Result<(), AllocErr> {
        self.initialized = false;
        self.classes.clear();
        self.starts.clear();

        let old_size = self.heap.heap_size();
        let overhead = PADDING.0 + WORD.0;
        let mut size = cmp::max(align_up(old_size)?.0, overhead);
        if size > overhead && size - overhead < MIN_BLOCK_SIZE.0 {
            // Too small to hold a free block; round the leftover up to one.
            size = overhead + MIN_BLOCK_SIZE.0;
        }
        if size > old_size.0 {
            self.heap.grow(Bytes(size - old_size.0))?;
        }

        let mem = self.heap.memory_mut();
        write_word(mem, 0, 0);
        let free_size = Bytes(size - overhead);
        if free_size.0 == 0 {
            FIRST_BLOCK.set_header(mem, Header::epilogue(true));
        } else {
            mark_free(mem, FIRST_BLOCK, free_size, true);
            FIRST_BLOCK
                .next(free_size)
                .set_header(mem, Header::epilogue(false));
            self.classes.insert(mem, FIRST_BLOCK);
        }

        self.initialized = true;
        log::debug!(
            "initialized heap of {} bytes ({} bytes free)",
            size,
            free_size.0
        );
        assert_heap_is_valid(self);
        Ok(())
    }

    /// Allocate a block with room for at least `size` bytes. The payload is
    /// 16-byte aligned and its contents are unspecified.
    ///
    /// Allocating zero bytes returns `Ok(None)`.
    pub fn alloc(&mut self, size: usize) -> Result<Option<Payload>, AllocErr> {
        self.ensure_initialized()?;
        if size == 0 {
            return Ok(None);
        }

        let asize = round_up(size)?;
        let block = self.alloc_block(asize)?;
        let payload = self.place(block, asize);

        log::trace!("alloc({}) -> {:#x}", size, payload.offset());
        assert_heap_is_valid(self);
        Ok(Some(payload))
    }

    /// Return a block to the allocator. `None` is ignored.
    ///
    /// Pointers that do not name a live block are rejected with
    /// `InvalidPointer` or `DoubleFree`, and leave the heap untouched.
    pub fn free(&mut self, ptr: Option<Payload>) -> Result<(), AllocErr> {
        let payload = match ptr {
            Some(payload) => payload,
            None => return Ok(()),
        };
        self.ensure_initialized()?;

        let block = self.allocated_block(payload)?;
        log::trace!("free({:#x})", payload.offset());
        self.release(block);

        assert_heap_is_valid(self);
        Ok(())
    }

    /// Resize a block, keeping the first `min(old capacity, size)` bytes of
    /// its contents.
    ///
    /// `realloc(None, size)` is `alloc(size)` and `realloc(ptr, 0)` is
    /// `free(ptr)`. Otherwise the block is shrunk or grown in place when
    /// possible, and moved when not. On failure the original block is left
    /// alone and still belongs to the caller.
    pub fn realloc(
        &mut self,
        ptr: Option<Payload>,
        size: usize,
    ) -> Result<Option<Payload>, AllocErr> {
        let payload = match ptr {
            Some(payload) => payload,
            None => return self.alloc(size),
        };
        if size == 0 {
            self.free(Some(payload))?;
            return Ok(None);
        }
        self.ensure_initialized()?;

        let block = self.allocated_block(payload)?;
        let asize = round_up(size)?;
        let old_size = block.header(self.heap.memory()).size;

        let result = if asize <= old_size {
            log::trace!("realloc({:#x}, {}): shrink in place", payload.offset(), size);
            self.split_off_tail(block, asize);
            payload
        } else if self.grow_in_place(block, asize)? {
            log::trace!("realloc({:#x}, {}): grow in place", payload.offset(), size);
            payload
        } else {
            let new_block = self.alloc_block(asize)?;
            let new_payload = self.place(new_block, asize);

            let count = cmp::min(old_size.0 - WORD.0, size);
            let start = payload.offset();
            self.heap
                .memory_mut()
                .copy_within(start..start + count, new_payload.offset());
            self.release(block);

            log::trace!(
                "realloc({:#x}, {}): moved to {:#x}",
                payload.offset(),
                size,
                new_payload.offset()
            );
            new_payload
        };

        assert_heap_is_valid(self);
        Ok(Some(result))
    }

    /// Allocate zeroed room for `n` elements of `size` bytes each.
    ///
    /// Fails with `SizeOverflow` when `n * size` does not fit in a `usize`.
    pub fn calloc(&mut self, n: usize, size: usize) -> Result<Option<Payload>, AllocErr> {
        self.ensure_initialized()?;
        let total = n.checked_mul(size).ok_or(AllocErr::SizeOverflow)?;
        let payload = match self.alloc(total)? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let mem = self.heap.memory_mut();
        let capacity = Block::from_payload(payload).header(mem).size.0 - WORD.0;
        let start = payload.offset();
        mem[start..start + capacity].fill(0);
        Ok(Some(payload))
    }

    /// The number of bytes the caller may use at `ptr`, which is at least
    /// what was asked for.
    pub fn usable_size(&self, ptr: Payload) -> Result<usize, AllocErr> {
        self.ensure_initialized()?;
        let block = self.allocated_block(ptr)?;
        Ok(block.header(self.heap.memory()).size.0 - WORD.0)
    }

    /// The whole usable payload of a live block.
    pub fn payload(&self, ptr: Payload) -> Result<&[u8], AllocErr> {
        let len = self.usable_size(ptr)?;
        let start = ptr.offset();
        Ok(&self.heap.memory()[start..start + len])
    }

    /// The whole usable payload of a live block, mutably.
    pub fn payload_mut(&mut self, ptr: Payload) -> Result<&mut [u8], AllocErr> {
        let len = self.usable_size(ptr)?;
        let start = ptr.offset();
        Ok(&mut self.heap.memory_mut()[start..start + len])
    }

    /// The address of a payload in memory.
    ///
    /// The address is only as stable as the heap source's memory: it stays
    /// valid across growth for `MmapHeap`, but not for `VecHeap`. Nothing is
    /// validated.
    pub fn as_ptr(&mut self, ptr: Payload) -> *mut u8 {
        self.heap
            .memory_mut()
            .as_mut_ptr()
            .wrapping_add(ptr.offset())
    }

    /// The number of blocks in the free lists.
    pub fn free_blocks(&self) -> usize {
        if self.initialized {
            self.classes.len(self.heap.memory())
        } else {
            0
        }
    }

    /// Check that `payload` names a live block, and get that block.
    fn allocated_block(&self, payload: Payload) -> Result<Block, AllocErr> {
        self.validate_payload(payload).map_err(|e| {
            log::warn!("rejected pointer {:#x}: {}", payload.offset(), e);
            e
        })
    }

    fn validate_payload(&self, payload: Payload) -> Result<Block, AllocErr> {
        let offset = payload.offset();
        let invalid = AllocErr::InvalidPointer { offset };
        let mem = self.heap.memory();
        let epilogue = self.heap.heap_high() - WORD.0;

        if offset % ALIGNMENT.0 != 0 || offset < FIRST_BLOCK.payload().offset() {
            return Err(invalid);
        }
        let block = Block::from_payload(payload);
        if block.0 >= epilogue {
            return Err(invalid);
        }

        let raw = read_word(mem, block.0);
        if raw & Header::RESERVED != 0 {
            return Err(invalid);
        }
        let header = Header::decode(raw);
        if header.size < MIN_BLOCK_SIZE
            || header.size.0 % ALIGNMENT.0 != 0
            || header.size.0 > epilogue - block.0
        {
            return Err(invalid);
        }
        if header.is_free() {
            return Err(AllocErr::DoubleFree { offset });
        }
        // The bytes above may be payload bytes that only look like a header.
        if !self.starts.contains(block) {
            return Err(invalid);
        }
        extra_assert!(block.next(header.size).header(mem).prev_allocated);
        Ok(block)
    }

    /// Get a free block of at least `asize` bytes, unlinked from the free
    /// lists, growing the heap if none fits.
    fn alloc_block(&mut self, asize: Bytes) -> Result<Block, AllocErr> {
        let mem = self.heap.memory_mut();
        match self.classes.find_fit(mem, asize, self.config.fit) {
            Some(block) => {
                self.classes.remove(mem, block);
                Ok(block)
            }
            None => self.extend_heap(asize),
        }
    }

    /// Grow the heap so that a free block of at least `asize` bytes ends at
    /// the epilogue, and return that block, unlinked from the free lists.
    ///
    /// If the heap already ends in a free block, only the difference is asked
    /// for and the new space is merged into it.
    fn extend_heap(&mut self, asize: Bytes) -> Result<Block, AllocErr> {
        let mem = self.heap.memory();
        let epilogue = Block(self.heap.heap_high() - WORD.0);
        let epilogue_header = epilogue.header(mem);
        let trailing = if epilogue_header.prev_allocated {
            None
        } else {
            Some(epilogue.prev(mem))
        };
        let trailing_size = trailing.map_or(0, |block| block.header(mem).size.0);

        let needed = asize.0.saturating_sub(trailing_size);
        let increment = align_up(Bytes(cmp::max(needed, self.config.chunk_size.0)))?;
        let old_high = self.heap.grow(increment)?;
        extra_assert_eq!(old_high, epilogue.0 + WORD.0);
        log::debug!(
            "grew heap by {} bytes to {} bytes",
            increment.0,
            old_high + increment.0
        );

        let mem = self.heap.memory_mut();
        let (block, prev_allocated) = match trailing {
            Some(trailing) => {
                self.classes.remove(mem, trailing);
                (trailing, trailing.header(mem).prev_allocated)
            }
            None => (epilogue, epilogue_header.prev_allocated),
        };
        let size = Bytes(trailing_size + increment.0);
        mark_free(mem, block, size, prev_allocated);
        block.next(size).set_header(mem, Header::epilogue(false));
        Ok(block)
    }

    /// Allocate `asize` bytes at the start of `block`, which must be free and
    /// unlinked. The rest is split off into a new free block when it is large
    /// enough to be one.
    fn place(&mut self, block: Block, asize: Bytes) -> Payload {
        let mem = self.heap.memory_mut();
        let header = block.header(mem);
        extra_assert!(header.is_free());
        extra_assert!(header.size >= asize);
        assert_is_poisoned_with_free_pattern(mem, block, header.size);

        let remainder = header.size.0 - asize.0;
        if remainder >= MIN_BLOCK_SIZE.0 {
            block.set_header(mem, Header::allocated(asize, header.prev_allocated));
            let rest = block.next(asize);
            // The block after `rest` already knows its predecessor is free.
            mark_free(mem, rest, Bytes(remainder), true);
            self.classes.insert(mem, rest);
        } else {
            block.set_header(mem, Header::allocated(header.size, header.prev_allocated));
            block.next(header.size).set_prev_allocated(mem, true);
        }
        self.starts.insert(block);
        block.payload()
    }

    /// Merge a free, unlinked block with its free neighbors. Returns the
    /// merged block, which is free and unlinked too.
    fn coalesce(&mut self, block: Block) -> Block {
        let mem = self.heap.memory_mut();
        let header = block.header(mem);
        extra_assert!(header.is_free());

        let mut start = block;
        let mut size = header.size.0;
        let mut prev_allocated = header.prev_allocated;

        let next = block.next(header.size);
        let next_header = next.header(mem);
        if next_header.is_free() {
            self.classes.remove(mem, next);
            size += next_header.size.0;
        }

        if !header.prev_allocated {
            let prev = block.prev(mem);
            let prev_header = prev.header(mem);
            self.classes.remove(mem, prev);
            start = prev;
            size += prev_header.size.0;
            prev_allocated = prev_header.prev_allocated;
        }

        let size = Bytes(size);
        mark_free(mem, start, size, prev_allocated);
        start.next(size).set_prev_allocated(mem, false);
        start
    }

    /// Free an allocated block, merge it with its neighbors, and put the
    /// result in its free list.
    fn release(&mut self, block: Block) {
        let mem = self.heap.memory_mut();
        let header = block.header(mem);
        extra_assert!(header.allocated);
        mark_free(mem, block, header.size, header.prev_allocated);
        self.starts.remove(block);

        let merged = self.coalesce(block);
        self.classes.insert(self.heap.memory_mut(), merged);
    }

    /// Shrink an allocated block to `asize` bytes, freeing the tail if it is
    /// large enough to be a block of its own.
    fn split_off_tail(&mut self, block: Block, asize: Bytes) {
        let mem = self.heap.memory_mut();
        let header = block.header(mem);
        extra_assert!(header.allocated);

        let remainder = header.size.0 - asize.0;
        if remainder < MIN_BLOCK_SIZE.0 {
            return;
        }
        block.set_header(mem, Header::allocated(asize, header.prev_allocated));
        let rest = block.next(asize);
        mark_free(mem, rest, Bytes(remainder), true);

        let merged = self.coalesce(rest);
        self.classes.insert(self.heap.memory_mut(), merged);
    }

    /// Try to grow an allocated block to `asize` bytes without moving it, by
    /// absorbing a free successor and, if the block then ends at the
    /// epilogue, by growing the heap. Returns whether it worked; if not,
    /// nothing changed.
    fn grow_in_place(&mut self, block: Block, asize: Bytes) -> Result<bool, AllocErr> {
        let mem = self.heap.memory();
        let header = block.header(mem);
        let next = FreeBlock::try_new(mem, block.next(header.size));

        let mut available = header.size.0;
        let mut end = block.next(header.size);
        if let Some(next) = next {
            let next_size = next.block().header(mem).size;
            available += next_size.0;
            end = next.block().next(next_size);
        }

        let mut grown = None;
        if available < asize.0 {
            if end.0 != self.heap.heap_high() - WORD.0 {
                return Ok(false);
            }
            let needed = asize.0 - available;
            let increment = align_up(Bytes(cmp::max(needed, self.config.chunk_size.0)))?;
            if let Err(e) = self.heap.grow(increment) {
                log::debug!("could not grow {:?} in place: {}", block, e);
                return Ok(false);
            }
            log::debug!("grew heap by {} bytes at {:?}", increment.0, block);
            available += increment.0;
            grown = Some(increment);
        }

        let mem = self.heap.memory_mut();
        if let Some(next) = next {
            self.classes.remove(mem, next.block());
        }
        let size = Bytes(available);
        block.set_header(mem, Header::allocated(size, header.prev_allocated));
        if grown.is_some() {
            block.next(size).set_header(mem, Header::epilogue(true));
        } else {
            block.next(size).set_prev_allocated(mem, true);
        }

        self.split_off_tail(block, asize);
        Ok(true)
    }
}
