use crate::block::{Block, FreeBlock, MIN_BLOCK_SIZE};
use core::cmp;
use core::mem;
use memory_units::Bytes;

/// The number of segregated free lists.
pub const NUM_SIZE_CLASSES: usize = 12;

// The first size class holds blocks of up to `1 << SMALLEST_CLASS_LOG2`
// bytes; every following class doubles that bound, except the last, which is
// unbounded.
const SMALLEST_CLASS_LOG2: u32 = 5;

/// How to pick among the free blocks of a size class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitPolicy {
    /// Take the first block that is large enough.
    FirstFit,
    /// Take the smallest block that is large enough, within the first size
    /// class that has one.
    BestFit,
}

/// An array of doubly-linked free lists, one per size class. The links live
/// inside the free blocks themselves; this only holds the heads.
pub(crate) struct SizeClasses {
    heads: [Option<Block>; NUM_SIZE_CLASSES],
}

impl SizeClasses {
    pub(crate) const fn new() -> SizeClasses {
        SizeClasses {
            heads: [None; NUM_SIZE_CLASSES],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.heads = [None; NUM_SIZE_CLASSES];
    }

    pub(crate) fn head(&self, class: usize) -> Option<Block> {
        self.heads[class]
    }

    /// Get the size class for blocks of the given size.
    pub(crate) fn class_for(size: Bytes) -> usize {
        extra_assert!(size >= MIN_BLOCK_SIZE);
        if size.0 <= 1 << SMALLEST_CLASS_LOG2 {
            return 0;
        }
        let bits = (mem::size_of::<usize>() * 8) as u32;
        let ceil_log2 = bits - (size.0 - 1).leading_zeros();
        cmp::min((ceil_log2 - SMALLEST_CLASS_LOG2) as usize, NUM_SIZE_CLASSES - 1)
    }

    /// Push a free block onto the head of its size class.
    pub(crate) fn insert(&mut self, mem: &mut [u8], block: Block) {
        let free = FreeBlock::new(mem, block);
        let class = Self::class_for(block.header(mem).size);
        let head = self.heads[class];

        free.set_next_free(mem, head);
        free.set_prev_free(mem, None);
        if let Some(head) = head {
            FreeBlock::new(mem, head).set_prev_free(mem, Some(block));
        }
        self.heads[class] = Some(block);
    }

    /// Unlink a free block from its size class. Must happen before the
    /// block's links get overwritten by a split or a merge.
    pub(crate) fn remove(&mut self, mem: &mut [u8], block: Block) {
        let free = FreeBlock::new(mem, block);
        let next = free.next_free(mem);
        let prev = free.prev_free(mem);

        match prev {
            Some(prev) => FreeBlock::new(mem, prev).set_next_free(mem, next),
            None => {
                let class = Self::class_for(block.header(mem).size);
                extra_assert_eq!(
                    self.heads[class],
                    Some(block),
                    "a free block without a predecessor must be its list's head"
                );
                self.heads[class] = next;
            }
        }
        if let Some(next) = next {
            FreeBlock::new(mem, next).set_prev_free(mem, prev);
        }

        free.set_next_free(mem, None);
        free.set_prev_free(mem, None);
    }

    /// Find a free block of at least `size` bytes, without unlinking it.
    ///
    /// Only the size classes starting at `size`'s own are searched: the
    /// smaller ones cannot hold a block that is large enough.
    pub(crate) fn find_fit(&self, mem: &[u8], size: Bytes, policy: FitPolicy) -> Option<Block> {
        for class in Self::class_for(size)..NUM_SIZE_CLASSES {
            let mut best: Option<(Block, Bytes)> = None;
            let mut cursor = self.heads[class];

            while let Some(block) = cursor {
                let block_size = block.header(mem).size;
                if block_size >= size {
                    if policy == FitPolicy::FirstFit || block_size == size {
                        return Some(block);
                    }
                    if best.map_or(true, |(_, best_size)| block_size < best_size) {
                        best = Some((block, block_size));
                    }
                }
                cursor = FreeBlock::new(mem, block).next_free(mem);
            }

            if let Some((block, _)) = best {
                return Some(block);
            }
        }
        None
    }

    /// The number of blocks across all free lists.
    pub(crate) fn len(&self, mem: &[u8]) -> usize {
        let mut len = 0;
        for head in self.heads.iter() {
            let mut cursor = *head;
            while let Some(block) = cursor {
                len += 1;
                cursor = FreeBlock::new(mem, block).next_free(mem);
            }
        }
        len
    }
}
