//! Heap consistency checking.
//!
//! This is a linear walk over every block and every free list, so it is far
//! too slow to run on each operation outside of the `extra_assertions`
//! feature. Tests and debugging sessions call `SegAlloc::check_heap` directly.

use crate::block::{
    read_word, Block, FreeBlock, Header, ALIGNMENT, FIRST_BLOCK, MIN_BLOCK_SIZE, PADDING, WORD,
};
use crate::size_classes::{SizeClasses, NUM_SIZE_CLASSES};
use crate::{AllocErr, HeapSource, SegAlloc};
use std::cmp;
use std::collections::HashSet;

/// A summary of a heap that passed validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Total heap bytes, including the padding word and the epilogue.
    pub heap_size: usize,
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
    /// Bytes in allocated blocks, headers included.
    pub allocated_bytes: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Bytes in free blocks, headers and footers included.
    pub free_bytes: usize,
    /// The largest free block, in bytes.
    pub largest_free: usize,
}

fn corrupt(offset: usize, reason: &'static str) -> AllocErr {
    AllocErr::CorruptHeap { offset, reason }
}

impl<H: HeapSource> SegAlloc<H> {
    /// Walk the whole heap and all free lists, verifying every invariant the
    /// allocator relies on:
    ///
    /// * every block is aligned, at least `MIN_BLOCK_SIZE` bytes, and ends
    ///   before the epilogue;
    /// * the epilogue is a zero-sized allocated block;
    /// * free blocks have a footer that matches their header;
    /// * no two free blocks are adjacent;
    /// * every header's "previous block is allocated" bit is accurate;
    /// * the allocator's table of block starts names exactly the allocated
    ///   blocks;
    /// * each free block is in exactly one free list, the one for its size,
    ///   and the lists hold nothing else;
    /// * the blocks, padding, and epilogue add up to the heap size.
    pub fn check_heap(&self) -> Result<HeapStats, AllocErr> {
        self.ensure_initialized()?;

        let mem = self.heap.memory();
        let high = self.heap.heap_high();
        if high < PADDING.0 + WORD.0 || high % ALIGNMENT.0 != 0 || mem.len() != high {
            return Err(corrupt(high, "heap size is not a whole number of aligned blocks"));
        }

        let epilogue = Block(high - WORD.0);
        let mut stats = HeapStats {
            heap_size: high,
            ..HeapStats::default()
        };
        let mut free_blocks = HashSet::new();
        let mut prev_allocated = true;
        let mut block = FIRST_BLOCK;

        loop {
            let raw = read_word(mem, block.0);
            if raw & Header::RESERVED != 0 {
                return Err(corrupt(block.0, "reserved header bits are set"));
            }
            let header = Header::decode(raw);
            if header.prev_allocated != prev_allocated {
                return Err(corrupt(
                    block.0,
                    "header disagrees with the state of the previous block",
                ));
            }

            if block == epilogue {
                if header.size.0 != 0 || !header.allocated {
                    return Err(corrupt(block.0, "epilogue is not a zero-sized allocated block"));
                }
                break;
            }

            if header.size.0 == 0 {
                return Err(corrupt(block.0, "zero-sized block before the epilogue"));
            }
            if header.size.0 % ALIGNMENT.0 != 0 {
                return Err(corrupt(block.0, "block size is not a multiple of the alignment"));
            }
            if header.size < MIN_BLOCK_SIZE {
                return Err(corrupt(block.0, "block is smaller than the minimum block size"));
            }
            if header.size.0 > epilogue.0 - block.0 {
                return Err(corrupt(block.0, "block runs past the epilogue"));
            }
            if block.payload().offset() % ALIGNMENT.0 != 0 {
                return Err(corrupt(block.0, "payload is misaligned"));
            }

            if header.allocated != self.starts.contains(block) {
                return Err(corrupt(block.0, "block start table disagrees with the header"));
            }
            if header.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += header.size.0;
            } else {
                if !prev_allocated {
                    return Err(corrupt(block.0, "two adjacent free blocks"));
                }
                if read_word(mem, block.footer_offset(header.size)) != raw {
                    return Err(corrupt(block.0, "free block's header and footer disagree"));
                }
                stats.free_blocks += 1;
                stats.free_bytes += header.size.0;
                stats.largest_free = cmp::max(stats.largest_free, header.size.0);
                free_blocks.insert(block);
            }

            prev_allocated = header.allocated;
            block = block.next(header.size);
        }

        if self.starts.len() != stats.allocated_blocks {
            return Err(corrupt(0, "block start table names a block that does not exist"));
        }

        if PADDING.0 + stats.allocated_bytes + stats.free_bytes + WORD.0 != high {
            return Err(corrupt(0, "block sizes do not add up to the heap size"));
        }

        // Every list entry must be a not-yet-seen free block from the walk
        // above. Removing entries as we go also catches cycles and blocks that
        // are listed twice.
        for class in 0..NUM_SIZE_CLASSES {
            let mut prev = None;
            let mut cursor = self.classes.head(class);
            while let Some(block) = cursor {
                if !free_blocks.remove(&block) {
                    return Err(corrupt(
                        block.0,
                        "free list entry is not an unlisted free block",
                    ));
                }
                let free = FreeBlock::new(mem, block);
                if SizeClasses::class_for(block.header(mem).size) != class {
                    return Err(corrupt(block.0, "free block is in the wrong size class"));
                }
                if free.prev_free(mem) != prev {
                    return Err(corrupt(block.0, "free list back link is broken"));
                }
                prev = Some(block);
                cursor = free.next_free(mem);
            }
        }

        if let Some(block) = free_blocks.iter().next() {
            return Err(corrupt(block.0, "free block is missing from the free lists"));
        }

        Ok(stats)
    }
}

extra_only! {
    pub(crate) fn assert_heap_is_valid<H: HeapSource>(alloc: &SegAlloc<H>) {
        if let Err(e) = alloc.check_heap() {
            panic!("{}", e);
        }
    }
}
