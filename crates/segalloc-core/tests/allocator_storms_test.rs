#![allow(unsafe_code)]

use segalloc_core::{
    ALIGNMENT, AllocError, Allocator, AllocatorConfig, ArenaKind, BackingError, Misuse,
};

const MIB: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn allocator() -> Allocator {
    Allocator::new(AllocatorConfig::default()).unwrap()
}

#[test]
fn interleaved_churn_counts_every_request() {
    const CYCLES: usize = 1_500_000;
    let mut a = allocator();
    let mut rng = XorShift64::new(42);
    let (mut nulls, mut non_nulls) = (0usize, 0usize);

    for i in 0..CYCLES {
        let size = rng.gen_range(1, 200);
        let p = a.allocate(size);
        if p.is_null() {
            nulls += 1;
        } else {
            non_nulls += 1;
            assert_eq!(p as usize % ALIGNMENT, 0);
            // SAFETY: `size` usable bytes.
            unsafe {
                *p = i as u8;
                *p.add(size - 1) = i as u8;
            }
        }
        if i % 2 == 0 {
            // SAFETY: released once; null is a no-op.
            unsafe { a.release(p) };
        }
    }

    assert_eq!(nulls + non_nulls, CYCLES);
    assert_eq!(nulls, 0);
    let stats = a.stats();
    assert_eq!(stats.live_chunks, CYCLES / 2);
    assert!(stats.reuse_hits > 0);

    let report = a.verify_heap().unwrap();
    assert_eq!(report.live_chunks, stats.live_chunks);
    assert_eq!(report.free_chunks, stats.free_chunks);
}

#[test]
fn sawtooth_returns_to_free_lists_without_new_arenas() {
    let mut a = allocator();
    let mut rng = XorShift64::new(7);
    let mut mapped_after_first_wave = 0;

    for wave in 0..5 {
        let mut live = Vec::with_capacity(5_000);
        for _ in 0..5_000 {
            let p = a.allocate(rng.gen_range(1, 512));
            assert!(!p.is_null());
            live.push(p);
        }
        for p in live.into_iter().rev() {
            // SAFETY: each pointer released once.
            unsafe { a.release(p) };
        }
        if wave == 0 {
            mapped_after_first_wave = a.stats().mapped_bytes;
        }
    }

    let stats = a.stats();
    assert_eq!(stats.live_chunks, 0);
    // Later waves draw different sizes, so a few classes may still need fresh chunks.
    assert!(stats.mapped_bytes <= mapped_after_first_wave * 2);
    assert!(stats.reuse_hits > 10_000);
    a.verify_heap().unwrap();
}

#[test]
fn size_class_thrash_preserves_contents() {
    let mut a = allocator();
    let mut rng = XorShift64::new(0xDEAD_BEEF);
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

    for step in 0..50_000usize {
        if live.len() < 64 || rng.gen_range(0, 1) == 0 {
            let size = 1usize << rng.gen_range(0, 16);
            let p = a.allocate(size);
            assert!(!p.is_null());
            let tag = (step % 251) as u8;
            // SAFETY: `size` usable bytes.
            unsafe { p.write_bytes(tag, size) };
            live.push((p, size, tag));
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let (p, size, tag) = live.swap_remove(idx);
            // SAFETY: `p` is live with `size` initialized bytes.
            unsafe {
                let bytes = std::slice::from_raw_parts(p, size);
                assert!(bytes.iter().all(|&b| b == tag));
                a.release(p);
            }
        }
    }
    assert_eq!(a.verify_heap().unwrap().live_chunks, live.len());
}

#[test]
fn large_class_churn_bounds_spare_arenas() {
    let mut a = Allocator::new(AllocatorConfig {
        large_retain_per_class: 2,
        ..AllocatorConfig::default()
    })
    .unwrap();
    let batch: Vec<*mut u8> = (0..8).map(|_| a.allocate(MIB)).collect();
    assert!(batch.iter().all(|p| !p.is_null()));
    let info = a.validate(batch[0]).unwrap();
    assert_eq!(info.arena_kind, ArenaKind::Dedicated);
    assert_eq!(info.usable_size, MIB);

    for p in batch {
        // SAFETY: each pointer released once.
        unsafe { a.release(p) };
    }
    let stats = a.stats();
    assert_eq!(stats.arenas, 2, "two spares retained for the class");
    assert_eq!(stats.retired_arenas, 6);
    assert_eq!(stats.arenas_released, 0);
    assert_eq!(stats.free_chunks, 2);
    a.verify_heap().unwrap();
}

#[test]
fn budget_exhaustion_is_recoverable() {
    let mut a = Allocator::new(AllocatorConfig {
        backing_limit: Some(16 * MIB),
        ..AllocatorConfig::default()
    })
    .unwrap();

    let mut held = Vec::new();
    let err = loop {
        match a.try_allocate(3 * MIB) {
            Ok(p) => held.push(p.as_ptr()),
            Err(err) => break err,
        }
        assert!(held.len() < 16, "budget never enforced");
    };
    assert!(matches!(
        err,
        AllocError::Exhausted(BackingError::LimitExceeded { .. })
    ));
    assert!(!held.is_empty());

    // SAFETY: each pointer released once.
    unsafe { a.release(held.pop().unwrap()) };
    assert!(!a.allocate(3 * MIB).is_null(), "freed chunk is reusable");
    assert!(a.allocate(512 * MIB).is_null());
    a.verify_heap().unwrap();
}

#[test]
fn misuse_is_classified_without_mutation() {
    let mut a = allocator();
    let p = a.allocate(24);
    let before = a.stats();

    let on_stack = 0u128;
    let stack_ptr = std::ptr::addr_of!(on_stack).cast::<u8>();
    assert_eq!(
        a.validate(stack_ptr),
        Err(Misuse::ForeignPointer {
            addr: stack_ptr as usize
        })
    );
    assert!(a.usable_size(stack_ptr).is_none());
    assert_eq!(a.stats(), before);

    // SAFETY: `p` is not used after the first release.
    unsafe {
        a.try_release(p).unwrap();
        assert!(matches!(a.try_release(p), Err(Misuse::DoubleFree { .. })));
    }
    assert_eq!(a.stats().releases, 1);
}

#[test]
fn independent_instances_do_not_share_chunks() {
    let mut first = allocator();
    let mut second = allocator();
    let p = first.allocate(64);
    assert!(first.validate(p).is_ok());
    assert!(matches!(
        second.validate(p),
        Err(Misuse::ForeignPointer { .. })
    ));
    let q = second.allocate(64);
    assert_ne!(p, q);
    // SAFETY: each released to its owner.
    unsafe {
        first.release(p);
        second.release(q);
    }
}
