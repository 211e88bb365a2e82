use crate::config::DEFAULT_MAX_HEAP_BYTES;
use crate::{AllocErr, HeapSource};
use memory_units::Bytes;

/// A heap kept in a `Vec<u8>` that never grows past a fixed limit.
///
/// Growing may move the bytes to a new address, so payloads must be
/// addressed by offset, through `SegAlloc::payload` and friends, rather than
/// by raw pointer.
#[derive(Debug)]
pub struct VecHeap {
    memory: Vec<u8>,
    limit: usize,
}

impl VecHeap {
    /// An empty heap limited to `DEFAULT_MAX_HEAP_BYTES`.
    pub const fn new() -> VecHeap {
        VecHeap::with_limit(DEFAULT_MAX_HEAP_BYTES)
    }

    /// An empty heap that refuses to grow past `limit` bytes.
    pub const fn with_limit(limit: usize) -> VecHeap {
        VecHeap {
            memory: Vec::new(),
            limit,
        }
    }

    /// The most bytes this heap will ever hold.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecHeap {
    fn default() -> VecHeap {
        VecHeap::new()
    }
}

impl HeapSource for VecHeap {
    fn grow(&mut self, increment: Bytes) -> Result<usize, AllocErr> {
        let old_len = self.memory.len();
        let exhausted = AllocErr::OutOfMemory {
            request: increment.0,
        };
        let new_len = old_len
            .checked_add(increment.0)
            .filter(|&len| len <= self.limit)
            .ok_or(exhausted)?;
        self.memory
            .try_reserve(increment.0)
            .map_err(|_| exhausted)?;
        self.memory.resize(new_len, 0);
        Ok(old_len)
    }

    fn heap_size(&self) -> Bytes {
        Bytes(self.memory.len())
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}
