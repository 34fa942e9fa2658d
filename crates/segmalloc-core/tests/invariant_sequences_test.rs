use std::ptr::NonNull;

use segmalloc_core::{
    AllocError, CoalescePolicy, ContractViolation, Heap, HeapConfig, LimitedPageSource,
    MAX_REQUEST, MIN_REQUEST, SafetyLevel, SystemPageSource,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }

    fn gen_request(&mut self) -> usize {
        8 * self.gen_range_usize(MIN_REQUEST / 8, MAX_REQUEST / 8)
    }
}

#[derive(Clone, Copy, Debug)]
struct Live {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn stamp(live: Live) {
    unsafe { live.ptr.as_ptr().write_bytes(live.tag, live.size) };
}

fn intact(live: Live) -> bool {
    let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.size) };
    bytes.iter().all(|&b| b == live.tag)
}

fn run_sequence(seed: u64, config: HeapConfig) {
    const STEPS: usize = 3_000;
    const SLOTS: usize = 48;

    let mut heap = Heap::with_config(LimitedPageSource::system(4096), config);
    let mut rng = XorShift64::new(seed);
    let mut slots: [Option<Live>; SLOTS] = [None; SLOTS];
    let mut expected_live = 0usize;

    for step in 0..STEPS {
        let idx = rng.gen_range_usize(0, SLOTS - 1);
        match slots[idx].take() {
            Some(live) => {
                assert!(intact(live), "seed={seed} step={step}: payload clobbered");
                unsafe { heap.free(live.ptr).unwrap() };
                expected_live -= 1;
            }
            None => {
                // Bias toward small sizes, like real traffic.
                let size = if rng.next_u64() % 4 == 0 {
                    rng.gen_request()
                } else {
                    8 * rng.gen_range_usize(1, 32)
                };
                let ptr = heap.malloc(size).unwrap();
                assert!(unsafe { heap.usable_size(ptr) } >= size);
                let live = Live {
                    ptr,
                    size,
                    tag: (step % 251) as u8,
                };
                stamp(live);
                slots[idx] = Some(live);
                expected_live += 1;
            }
        }

        assert_eq!(heap.stats().active_count, expected_live, "seed={seed} step={step}");
        if step % 97 == 0 {
            heap.verify()
                .unwrap_or_else(|e| panic!("seed={seed} step={step}: {e}"));
        }
    }

    for live in slots.into_iter().flatten() {
        assert!(intact(live), "seed={seed}: payload clobbered at teardown");
        unsafe { heap.free(live.ptr).unwrap() };
    }
    heap.verify().unwrap();

    let stats = heap.stats();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.allocations, stats.frees);
    if config.coalesce.enabled() {
        // Everything merged back: one whole-page block per held page.
        assert_eq!(heap.free_block_count(), heap.page_count());
    }
    if config.release_empty_pages {
        assert_eq!(heap.page_count(), 0);
        assert_eq!(heap.source().live_pages(), 0);
    }
}

#[test]
fn deterministic_sequences_hold_heap_invariants() {
    let configs = [
        HeapConfig::default(),
        HeapConfig::default().with_coalesce(CoalescePolicy::Off),
        HeapConfig::default().with_release_empty_pages(true),
        HeapConfig::default()
            .with_safety(SafetyLevel::Hardened)
            .with_lifecycle_logging(true),
    ];
    for config in configs {
        for seed in [1, 2, 3, 0x5EED_CAFE] {
            run_sequence(seed, config);
        }
    }
}

#[test]
fn hardened_sequences_reject_every_double_free() {
    let mut heap = Heap::with_config(
        LimitedPageSource::system(256),
        HeapConfig::default().with_safety(SafetyLevel::Hardened),
    );
    let mut rng = XorShift64::new(42);
    let mut freed = Vec::new();

    for _ in 0..200 {
        let ptr = heap.malloc(rng.gen_request()).unwrap();
        if rng.next_u64() % 2 == 0 {
            unsafe { heap.free(ptr).unwrap() };
            freed.push(ptr);
        }
    }

    let stats = heap.stats();
    for ptr in freed {
        // A freed block may already have been handed out again; only a
        // still-free header must be rejected.
        match unsafe { heap.free(ptr) } {
            Err(AllocError::Contract(
                ContractViolation::DoubleFree { .. } | ContractViolation::InteriorPointer { .. },
            )) => {}
            Ok(()) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
        heap.verify().unwrap();
    }
    assert!(heap.stats().frees >= stats.frees);
}

#[test]
fn exhaustion_under_churn_never_corrupts_bins() {
    let mut heap = Heap::with_config(
        LimitedPageSource::system(6),
        HeapConfig::default().with_coalesce(CoalescePolicy::Off),
    );
    let mut rng = XorShift64::new(7);
    let mut live = Vec::new();
    let mut failures = 0;

    for _ in 0..2_000 {
        if !live.is_empty() && rng.next_u64() % 3 == 0 {
            let idx = rng.gen_range_usize(0, live.len() - 1);
            let ptr = live.swap_remove(idx);
            unsafe { heap.free(ptr).unwrap() };
            continue;
        }
        match heap.malloc(rng.gen_request()) {
            Ok(ptr) => live.push(ptr),
            Err(err) => {
                assert!(err.is_exhaustion(), "{err}");
                failures += 1;
            }
        }
    }
    assert!(failures > 0, "page limit was never hit");
    assert!(heap.page_count() <= 6);
    heap.verify().unwrap();
    assert_eq!(heap.stats().page_failures, failures);
}
