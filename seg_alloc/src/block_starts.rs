//! A bitmap of where the allocated blocks start.
//!
//! Block headers sit at offsets that are `8 (mod 16)`, so each 16-byte unit of
//! the heap holds at most one of them and one bit per unit is enough. The
//! bitmap lives outside the heap, where a caller writing to its payloads can
//! not forge an entry.

use crate::block::{Block, ALIGNMENT};

const BITS: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct BlockStarts {
    words: Vec<u64>,
}

impl BlockStarts {
    pub(crate) const fn new() -> BlockStarts {
        BlockStarts { words: Vec::new() }
    }

    /// Forget every block. Keeps the storage around for the next heap.
    pub(crate) fn clear(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }

    #[inline]
    fn index(block: Block) -> (usize, u64) {
        let unit = block.0 / ALIGNMENT.0;
        (unit / BITS, 1 << (unit % BITS))
    }

    pub(crate) fn insert(&mut self, block: Block) {
        let (word, bit) = Self::index(block);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= bit;
    }

    pub(crate) fn remove(&mut self, block: Block) {
        let (word, bit) = Self::index(block);
        extra_assert!(self.contains(block));
        if let Some(word) = self.words.get_mut(word) {
            *word &= !bit;
        }
    }

    pub(crate) fn contains(&self, block: Block) -> bool {
        let (word, bit) = Self::index(block);
        self.words.get(word).map_or(false, |word| word & bit != 0)
    }

    /// The number of blocks in the set.
    pub(crate) fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}
