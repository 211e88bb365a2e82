use crate::config::DEFAULT_MAX_HEAP_BYTES;
use crate::{AllocErr, HeapSource};
use core::cmp;
use core::ptr;
use core::slice;
use memory_units::Bytes;

/// A heap carved out of one `mmap`ed reservation, grown by moving a break
/// pointer through it like `sbrk` does.
///
/// The whole reservation is mapped up front, so the heap's base address never
/// changes and raw payload pointers stay valid across growth. Untouched pages
/// cost nothing until they are first written.
#[derive(Debug)]
pub struct MmapHeap {
    base: ptr::NonNull<u8>,
    brk: usize,
    reserved: usize,
}

// The mapping is exclusively owned by this value and only reachable through
// `&self`/`&mut self`.
unsafe impl Send for MmapHeap {}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

impl MmapHeap {
    /// Reserve `DEFAULT_MAX_HEAP_BYTES` of address space.
    pub fn new() -> Result<MmapHeap, AllocErr> {
        MmapHeap::with_limit(DEFAULT_MAX_HEAP_BYTES)
    }

    /// Reserve `limit` bytes of address space, rounded up to whole pages.
    pub fn with_limit(limit: usize) -> Result<MmapHeap, AllocErr> {
        let page = page_size();
        let failed = AllocErr::MapFailed { request: limit };
        let reserved = cmp::max(limit, 1)
            .checked_add(page - 1)
            .ok_or(failed)?
            / page
            * page;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                reserved,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(failed);
        }
        let base = ptr::NonNull::new(addr as *mut u8).ok_or(failed)?;
        log::debug!("reserved {} bytes of heap at {:p}", reserved, base);
        Ok(MmapHeap {
            base,
            brk: 0,
            reserved,
        })
    }

    /// The heap's base address, fixed for the heap's lifetime.
    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// The size of the address space reservation.
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl HeapSource for MmapHeap {
    fn grow(&mut self, increment: Bytes) -> Result<usize, AllocErr> {
        let new_brk = self
            .brk
            .checked_add(increment.0)
            .filter(|&brk| brk <= self.reserved)
            .ok_or(AllocErr::OutOfMemory {
                request: increment.0,
            })?;
        let old_brk = self.brk;
        self.brk = new_brk;
        Ok(old_brk)
    }

    fn heap_size(&self) -> Bytes {
        Bytes(self.brk)
    }

    fn memory(&self) -> &[u8] {
        // `[base, base + brk)` lies inside our live, readable mapping.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        // As above, and `&mut self` guarantees the slice is unique.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
    }
}

impl Drop for MmapHeap {
    fn drop(&mut self) {
        let code = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.reserved) };
        extra_assert_eq!(code, 0, "munmap should run OK");
    }
}
