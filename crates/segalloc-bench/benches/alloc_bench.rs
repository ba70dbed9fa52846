//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use segalloc_core::{Allocator, AllocatorConfig};

fn allocator() -> Allocator {
    Allocator::new(AllocatorConfig::default()).expect("default config is valid")
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    // One size per region of the class table: smallest, mid small, largest
    // small, first large, large.
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768, 65536, 1 << 20];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        let mut a = allocator();
        group.bench_with_input(BenchmarkId::new("segalloc", size), &size, |b, &sz| {
            b.iter(|| {
                let p = a.allocate(black_box(sz));
                // SAFETY: released once.
                unsafe { a.release(p) };
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v: Vec<u8> = Vec::with_capacity(sz);
                black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B", |b| {
        let mut a = allocator();
        let mut ptrs = Vec::with_capacity(1000);
        b.iter(|| {
            ptrs.extend((0..1000).map(|_| a.allocate(64)));
            for p in ptrs.drain(..) {
                // SAFETY: each pointer released once.
                unsafe { a.release(p) };
            }
        });
    });

    group.bench_function("abi_1000x64B", |b| {
        let mut ptrs = Vec::with_capacity(1000);
        b.iter(|| {
            // SAFETY: each pointer released once.
            unsafe {
                ptrs.extend((0..1000).map(|_| segalloc_abi::alloc(64)));
                for p in ptrs.drain(..) {
                    segalloc_abi::dealloc(p);
                }
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst);
criterion_main!(benches);
