//! Block layout: header and footer words, alignment rounding, and the
//! arithmetic that finds a block's physical neighbors.
//!
//! Every block starts with a one word header. Free blocks additionally keep
//! their free list links in the first two payload words and a copy of the
//! header in their last word, the footer:
//!
//! ```text
//!     allocated block               free block
//!   +-----------------+          +-----------------+
//!   | header          |          | header          |  <- Block
//!   +-----------------+          +-----------------+
//!   | payload ...     |          | next free       |  <- Payload
//!   |                 |          | prev free       |
//!   |                 |          | ...             |
//!   |                 |          | footer          |
//!   +-----------------+          +-----------------+
//! ```

use crate::AllocErr;
use core::cmp;
use core::num::NonZeroUsize;
use memory_units::Bytes;

/// The alignment of every payload handed out by the allocator.
pub const ALIGNMENT: Bytes = Bytes(16);

/// The size of a header, footer, or free list link.
pub const WORD: Bytes = Bytes(8);

/// The smallest block that can hold a header, both free list links, and a
/// footer at the same time.
pub const MIN_BLOCK_SIZE: Bytes = Bytes(32);

/// The padding word at the start of the heap. It pushes every header to an
/// offset that is 8 modulo 16, so that payloads come out 16-byte aligned.
pub(crate) const PADDING: Bytes = WORD;

/// Where the first block's header lives.
pub(crate) const FIRST_BLOCK: Block = Block(PADDING.0);

/// The smallest multiple of `ALIGNMENT` that is at least `n`.
#[inline]
pub(crate) fn align_up(n: Bytes) -> Result<Bytes, AllocErr> {
    let n = n
        .0
        .checked_add(ALIGNMENT.0 - 1)
        .ok_or(AllocErr::SizeOverflow)?;
    Ok(Bytes(n & !(ALIGNMENT.0 - 1)))
}

/// Get the block size needed to satisfy a request for `n` payload bytes: room
/// for the header, rounded up to the alignment, and never smaller than
/// `MIN_BLOCK_SIZE`.
///
/// ```
/// use seg_alloc::{round_up, Bytes};
///
/// assert_eq!(round_up(1).unwrap(), Bytes(32));
/// assert_eq!(round_up(24).unwrap(), Bytes(32));
/// assert_eq!(round_up(25).unwrap(), Bytes(48));
/// assert!(round_up(usize::max_value()).is_err());
/// ```
pub fn round_up(n: usize) -> Result<Bytes, AllocErr> {
    let with_header = n.checked_add(WORD.0).ok_or(AllocErr::SizeOverflow)?;
    let size = align_up(Bytes(with_header))?;
    Ok(cmp::max(size, MIN_BLOCK_SIZE))
}

#[inline]
pub(crate) fn read_word(mem: &[u8], at: usize) -> u64 {
    let mut word = [0; 8];
    word.copy_from_slice(&mem[at..at + WORD.0]);
    u64::from_ne_bytes(word)
}

#[inline]
pub(crate) fn write_word(mem: &mut [u8], at: usize, value: u64) {
    mem[at..at + WORD.0].copy_from_slice(&value.to_ne_bytes());
}

/// A decoded header (or footer) word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) size: Bytes,
    pub(crate) allocated: bool,
    pub(crate) prev_allocated: bool,
}

impl Header {
    // Low bits of a header word.
    //
    // `PREV_ALLOCATED` mirrors the state of the physically previous block, so
    // that allocated blocks can go without a footer: we only ever read the
    // previous block's footer when this bit is clear.
    const ALLOCATED: u64 = 0b0001;
    const PREV_ALLOCATED: u64 = 0b0010;
    pub(crate) const RESERVED: u64 = 0b1100;
    const FLAGS: u64 = 0b1111;

    pub(crate) fn allocated(size: Bytes, prev_allocated: bool) -> Header {
        Header {
            size,
            allocated: true,
            prev_allocated,
        }
    }

    pub(crate) fn free(size: Bytes, prev_allocated: bool) -> Header {
        Header {
            size,
            allocated: false,
            prev_allocated,
        }
    }

    /// The zero-sized, always allocated block that terminates the heap.
    pub(crate) fn epilogue(prev_allocated: bool) -> Header {
        Header::allocated(Bytes(0), prev_allocated)
    }

    pub(crate) fn encode(self) -> u64 {
        extra_assert_eq!(self.size.0 % ALIGNMENT.0, 0);
        let mut word = self.size.0 as u64;
        if self.allocated {
            word |= Self::ALLOCATED;
        }
        if self.prev_allocated {
            word |= Self::PREV_ALLOCATED;
        }
        word
    }

    pub(crate) fn decode(word: u64) -> Header {
        Header {
            size: Bytes((word & !Self::FLAGS) as usize),
            allocated: word & Self::ALLOCATED != 0,
            prev_allocated: word & Self::PREV_ALLOCATED != 0,
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        !self.allocated
    }
}

/// A payload address handed out to callers: a non-zero byte offset from the
/// start of the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(NonZeroUsize);

impl Payload {
    /// Reconstruct a payload from a raw heap offset. Zero is never a payload.
    ///
    /// Nothing is validated here; the allocator checks the offset whenever it
    /// is passed back in.
    pub fn from_offset(offset: usize) -> Option<Payload> {
        NonZeroUsize::new(offset).map(Payload)
    }

    /// The payload's byte offset from the start of the heap.
    #[inline]
    pub fn offset(self) -> usize {
        self.0.get()
    }
}

/// The heap offset of a block's header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(pub(crate) usize);

impl Block {
    #[inline]
    pub(crate) fn from_payload(payload: Payload) -> Block {
        extra_assert!(payload.offset() >= WORD.0);
        Block(payload.offset() - WORD.0)
    }

    #[inline]
    pub(crate) fn payload(self) -> Payload {
        let offset = self.0 + WORD.0;
        extra_assert_eq!(offset % ALIGNMENT.0, 0, "{:?} has a misaligned payload", self);
        // A header never sits past the end of the address space, so adding
        // a word to it cannot wrap to zero.
        Payload(unsafe { NonZeroUsize::new_unchecked(offset) })
    }

    #[inline]
    pub(crate) fn header(self, mem: &[u8]) -> Header {
        Header::decode(read_word(mem, self.0))
    }

    #[inline]
    pub(crate) fn set_header(self, mem: &mut [u8], header: Header) {
        write_word(mem, self.0, header.encode());
    }

    #[inline]
    pub(crate) fn footer_offset(self, size: Bytes) -> usize {
        self.0 + size.0 - WORD.0
    }

    /// The physically next block.
    #[inline]
    pub(crate) fn next(self, size: Bytes) -> Block {
        Block(self.0 + size.0)
    }

    /// The physically previous block, found through its footer.
    ///
    /// Only free blocks have footers, so this may only be called when this
    /// block's header says the previous block is free.
    pub(crate) fn prev(self, mem: &[u8]) -> Block {
        extra_assert!(!self.header(mem).prev_allocated);
        let footer = Header::decode(read_word(mem, self.0 - WORD.0));
        extra_assert!(footer.is_free(), "the footer before {:?} is not free", self);
        Block(self.0 - footer.size.0)
    }

    pub(crate) fn set_prev_allocated(self, mem: &mut [u8], prev_allocated: bool) {
        let header = self.header(mem);
        self.set_header(
            mem,
            Header {
                prev_allocated,
                ..header
            },
        );
    }
}

/// Write a free block's header and footer.
pub(crate) fn mark_free(mem: &mut [u8], block: Block, size: Bytes, prev_allocated: bool) {
    extra_assert!(size >= MIN_BLOCK_SIZE);
    let header = Header::free(size, prev_allocated);
    block.set_header(mem, header);
    write_word(mem, block.footer_offset(size), header.encode());
    write_free_pattern(mem, block, size);
}

/// A view of a block that is known to be free, and therefore has meaningful
/// free list links in its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    // Link values. A link is the header offset of another free block, and no
    // header ever lives at offset zero.
    const NONE: u64 = 0;

    /// Get the free view of `block`.
    ///
    /// Panics if the block's header says it is allocated: reading an
    /// allocated block's payload as links would hand out the caller's data.
    pub(crate) fn new(mem: &[u8], block: Block) -> FreeBlock {
        assert!(
            block.header(mem).is_free(),
            "{:?} is allocated and has no free list links",
            block
        );
        FreeBlock(block)
    }

    /// Get the free view of `block`, if it is free.
    pub(crate) fn try_new(mem: &[u8], block: Block) -> Option<FreeBlock> {
        if block.header(mem).is_free() {
            Some(FreeBlock(block))
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn block(self) -> Block {
        self.0
    }

    fn link_offset(self, which: usize) -> usize {
        self.0.payload().offset() + which * WORD.0
    }

    fn link(self, mem: &[u8], which: usize) -> Option<Block> {
        extra_assert!(self.0.header(mem).is_free());
        match read_word(mem, self.link_offset(which)) {
            Self::NONE => None,
            raw => Some(Block(raw as usize)),
        }
    }

    fn set_link(self, mem: &mut [u8], which: usize, link: Option<Block>) {
        extra_assert!(self.0.header(mem).is_free());
        let raw = link.map_or(Self::NONE, |b| b.0 as u64);
        write_word(mem, self.link_offset(which), raw);
    }

    pub(crate) fn next_free(self, mem: &[u8]) -> Option<Block> {
        self.link(mem, 0)
    }

    pub(crate) fn prev_free(self, mem: &[u8]) -> Option<Block> {
        self.link(mem, 1)
    }

    pub(crate) fn set_next_free(self, mem: &mut [u8], next: Option<Block>) {
        self.set_link(mem, 0, next)
    }

    pub(crate) fn set_prev_free(self, mem: &mut [u8], prev: Option<Block>) {
        self.set_link(mem, 1, prev)
    }
}

// Whenever a block becomes free, we write this pattern over the part of its
// payload that holds neither links nor the footer.
//
// If you see unexpected `0x57575757` values, then either (a) you have a
// use-after-free, or (b) there is a bug in the split or coalesce code.
#[cfg(feature = "extra_assertions")]
const FREE_PATTERN: u8 = 0x57;

#[cfg(feature = "extra_assertions")]
fn poisoned_range(block: Block, size: Bytes) -> core::ops::Range<usize> {
    let start = block.payload().offset() + 2 * WORD.0;
    let end = block.footer_offset(size);
    start..cmp::max(start, end)
}

extra_only! {
    fn write_free_pattern(mem: &mut [u8], block: Block, size: Bytes) {
        for byte in &mut mem[poisoned_range(block, size)] {
            *byte = FREE_PATTERN;
        }
    }
}

extra_only! {
    pub(crate) fn assert_is_poisoned_with_free_pattern(mem: &[u8], block: Block, size: Bytes) {
        assert!(
            mem[poisoned_range(block, size)].iter().all(|byte| *byte == FREE_PATTERN),
            "free {:?} was written to after it was freed",
            block
        );
    }
}
