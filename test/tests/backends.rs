//! Running the allocator on each of the shipped heap sources.

use seg_alloc::{AllocErr, Bytes, Config, HeapSource, SegAlloc, VecHeap};

fn exercise<H: HeapSource>(heap: H) -> SegAlloc<H> {
    let mut heap = SegAlloc::new(heap, Config::new().with_chunk_size(Bytes(1024)));
    heap.init().unwrap();

    let mut payloads = vec![];
    for size in (1..200).map(|i| i * 37) {
        let p = heap.alloc(size).unwrap().unwrap();
        heap.payload_mut(p).unwrap()[..size]
            .iter_mut()
            .for_each(|b| *b = size as u8);
        payloads.push((p, size));
    }
    for (i, &(p, size)) in payloads.iter().enumerate() {
        assert!(heap.payload(p).unwrap()[..size].iter().all(|b| *b == size as u8));
        if i % 2 == 0 {
            heap.free(Some(p)).unwrap();
        }
    }
    heap.check_heap().unwrap();
    heap
}

#[test]
fn vec_heap() {
    let heap = exercise(VecHeap::new());
    assert!(heap.heap().heap_size().0 <= heap.heap().limit());
}

#[test]
fn vec_heap_limit_is_respected() {
    let mut heap = SegAlloc::new(VecHeap::with_limit(4096), Config::new());
    heap.init().unwrap();
    assert_eq!(heap.alloc(8), Err(AllocErr::OutOfMemory { request: 4096 }));

    let mut heap = SegAlloc::new(VecHeap::with_limit(4096), Config::new().with_chunk_size(Bytes(0)));
    heap.init().unwrap();
    let p = heap.alloc(4000).unwrap().unwrap();
    assert!(heap.alloc(100).is_err());
    heap.free(Some(p)).unwrap();
    assert!(heap.alloc(100).unwrap().is_some());
    heap.check_heap().unwrap();
}

#[test]
fn default_heap() {
    exercise(seg_alloc::default_heap().unwrap());
}

#[cfg(unix)]
#[test]
fn mmap_heap() {
    exercise(seg_alloc::MmapHeap::with_limit(1 << 20).unwrap());
}

#[cfg(unix)]
#[test]
fn mmap_heap_addresses_are_stable() {
    let heap = seg_alloc::MmapHeap::with_limit(1 << 20).unwrap();
    let mut heap = SegAlloc::new(heap, Config::new().with_chunk_size(Bytes(0)));
    heap.init().unwrap();

    let p = heap.alloc(64).unwrap().unwrap();
    let ptr = heap.as_ptr(p);
    assert_eq!(ptr as usize % 16, 0);
    unsafe {
        *ptr = 0xab;
    }

    // Grow the heap well past its first page.
    for _ in 0..16 {
        heap.alloc(4096).unwrap().unwrap();
    }
    assert_eq!(heap.as_ptr(p), ptr);
    assert_eq!(heap.payload(p).unwrap()[0], 0xab);
}

#[test]
fn reinit_on_a_used_heap() {
    let mut heap = exercise(VecHeap::new());
    let size = heap.heap().heap_size();
    heap.init().unwrap();
    let stats = heap.check_heap().unwrap();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(heap.heap().heap_size(), size);
}
