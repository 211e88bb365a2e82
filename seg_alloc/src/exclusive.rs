use crate::SegAlloc;
use spin::Mutex;

/// A `SegAlloc` behind one global spin lock, so that it can be shared between
/// threads, for example from a `static`.
///
/// Every operation takes the lock for its whole duration; there is no finer
/// grained concurrency.
///
/// ```
/// use seg_alloc::{Config, LockedSegAlloc, SegAlloc, VecHeap};
///
/// static HEAP: LockedSegAlloc<VecHeap> =
///     LockedSegAlloc::new(SegAlloc::new(VecHeap::new(), Config::new()));
///
/// HEAP.with_exclusive_access(|heap| -> Result<(), seg_alloc::AllocErr> {
///     heap.init()?;
///     let p = heap.alloc(64)?;
///     heap.free(p)
/// })
/// .unwrap();
/// ```
pub struct LockedSegAlloc<H> {
    inner: Mutex<SegAlloc<H>>,
}

impl<H> LockedSegAlloc<H> {
    /// Wrap an allocator.
    pub const fn new(alloc: SegAlloc<H>) -> LockedSegAlloc<H> {
        LockedSegAlloc {
            inner: Mutex::new(alloc),
        }
    }

    /// Get exclusive, mutable access to the allocator for the duration of
    /// `f`.
    ///
    /// `f` must not re-enter this method for the same `LockedSegAlloc`: the
    /// lock is not re-entrant and doing so spins forever.
    #[inline]
    pub fn with_exclusive_access<F, U>(&self, f: F) -> U
    where
        for<'x> F: FnOnce(&'x mut SegAlloc<H>) -> U,
    {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Unwrap the allocator.
    pub fn into_inner(self) -> SegAlloc<H> {
        self.inner.into_inner()
    }
}
