//! Fragmentation and churn benchmarks.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use segalloc_core::{Allocator, AllocatorConfig};

#[derive(Clone, Copy)]
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

    fn gen_range(&mut self, low: usize, high_exclusive: usize) -> usize {
        low + (self.next_u64() as usize % (high_exclusive - low))
    }
}

fn allocator() -> Allocator {
    Allocator::new(AllocatorConfig::default()).expect("default config is valid")
}

/// 2000 allocations of 1..100 bytes with every other one released.
fn fragmented() -> (Allocator, Vec<*mut u8>) {
    let mut a = allocator();
    let mut rng = XorShift64::new(42);
    let allocs: Vec<*mut u8> = (0..2000)
        .map(|_| a.allocate(rng.gen_range(1, 100)))
        .collect();
    let mut survivors = Vec::with_capacity(1000);
    for (i, p) in allocs.into_iter().enumerate() {
        if i % 2 == 0 {
            // SAFETY: released once.
            unsafe { a.release(p) };
        } else {
            survivors.push(p);
        }
    }
    (a, survivors)
}

fn bench_after_fragmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");

    group.bench_function("alloc_after_random_fragmentation", |b| {
        let mut rng = XorShift64::new(0xcafe_babe);
        b.iter_batched(
            fragmented,
            |(mut a, survivors)| {
                for _ in 0..1000 {
                    black_box(a.allocate(rng.gen_range(1, 100)));
                }
                (a, survivors)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");

    group.bench_function("10k_cycles_half_released", |b| {
        let mut a = allocator();
        let mut rng = XorShift64::new(42);
        let mut held = Vec::with_capacity(5_000);
        b.iter(|| {
            for i in 0..10_000 {
                let p = a.allocate(rng.gen_range(1, 201));
                if i % 2 == 0 {
                    // SAFETY: released once.
                    unsafe { a.release(p) };
                } else {
                    held.push(p);
                }
            }
            for p in held.drain(..) {
                // SAFETY: released once.
                unsafe { a.release(p) };
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_after_fragmentation, bench_churn);
criterion_main!(benches);
