//! Random alloc/free workloads checked against a shadow model of the live
//! allocations.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use seg_alloc::{
    round_up, Config, HeapSource, Payload, SegAlloc, VecHeap, ALIGNMENT, MIN_BLOCK_SIZE, WORD,
};

#[derive(Debug)]
struct Shadow {
    // Live payloads, with the byte count asked for and the block size that
    // request rounds up to.
    live: Vec<(Payload, usize, usize)>,
}

// A block may keep a tail that is too small to split off.
const MAX_SLACK: usize = MIN_BLOCK_SIZE.0 - ALIGNMENT.0;

impl Shadow {
    fn allocated_bytes(&self) -> usize {
        self.live.iter().map(|&(_, _, block)| block).sum()
    }

    fn check<H: HeapSource>(&self, heap: &SegAlloc<H>) {
        let stats = heap.check_heap().expect("heap should be valid");
        assert_eq!(stats.allocated_blocks, self.live.len());
        assert!(stats.allocated_bytes >= self.allocated_bytes());
        assert!(stats.allocated_bytes <= self.allocated_bytes() + MAX_SLACK * self.live.len());
        assert_eq!(
            2 * WORD.0 + stats.allocated_bytes + stats.free_bytes,
            heap.heap().heap_size().0
        );
        assert!(stats.free_blocks <= self.live.len() + 1);
        for &(payload, size, block) in &self.live {
            assert!(block - WORD.0 >= size);
            let actual = heap.usable_size(payload).unwrap() + WORD.0;
            assert!(actual >= block, "{} vs {}", actual, block);
            let slack = actual - block;
            assert!(slack <= MAX_SLACK && slack % ALIGNMENT.0 == 0, "{} vs {}", actual, block);
        }
    }
}

fn random_workload(seed: u64, ops: usize, config: Config) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut heap = SegAlloc::new(VecHeap::with_limit(1 << 26), config);
    heap.init().unwrap();
    let mut shadow = Shadow { live: vec![] };

    for _ in 0..ops {
        if !shadow.live.is_empty() && rng.gen_ratio(2, 5) {
            let i = rng.gen_range(0..shadow.live.len());
            let (payload, _, _) = shadow.live.swap_remove(i);
            heap.free(Some(payload)).unwrap();
        } else {
            let size = rng.gen_range(16..=4096);
            let payload = heap.alloc(size).unwrap().unwrap();
            let block = round_up(size).unwrap().0;
            assert!(shadow.live.iter().all(|&(p, _, b)| {
                payload.offset() + block - WORD.0 <= p.offset() - WORD.0
                    || p.offset() + b - WORD.0 <= payload.offset() - WORD.0
            }));
            shadow.live.push((payload, size, block));
        }
        shadow.check(&heap);
    }

    for (payload, _, _) in shadow.live.drain(..) {
        heap.free(Some(payload)).unwrap();
    }
    shadow.check(&heap);
    let stats = heap.check_heap().unwrap();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.largest_free, heap.heap().heap_size().0 - 2 * WORD.0);
}

#[test]
fn thousand_random_operations() {
    random_workload(1, 1000, Config::new());
}

#[test]
fn thousand_random_operations_without_chunking() {
    random_workload(2, 1000, Config::new().with_chunk_size(seg_alloc::Bytes(0)));
}

#[test]
fn thousand_random_operations_first_fit() {
    random_workload(3, 1000, Config::new().with_fit(seg_alloc::FitPolicy::FirstFit));
}
