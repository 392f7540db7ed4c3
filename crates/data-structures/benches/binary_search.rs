//! Compares the generic search helpers against `slice::binary_search`.

use std::collections::VecDeque;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use virtseq_data_structures::binary_search::{binary_search, binary_search_with};

const DATA_COUNT: usize = 10_000;
const SAMPLE_COUNT: usize = 1_000;

/// A strictly increasing sequence with random gaps of 1..10 between elements.
fn gen_sorted(rng: &mut impl Rng) -> Vec<u32> {
    let mut prev = 0;
    (0..DATA_COUNT)
        .map(|_| {
            prev += rng.random_range(1..10);
            prev
        })
        .collect()
}

fn gen_keys(rng: &mut impl Rng, max: u32) -> Vec<u32> {
    (0..SAMPLE_COUNT).map(|_| rng.random_range(0..=max)).collect()
}

fn search(c: &mut Criterion) {
    let mut rng = rand::rng();
    let data = gen_sorted(&mut rng);
    let keys = gen_keys(&mut rng, data[data.len() - 1]);
    let deque: VecDeque<u32> = data.iter().copied().collect();
    let by_value = |x: &u32, key: &u32| x.cmp(key);

    let mut group = c.benchmark_group("binary_search");
    group.bench_function(BenchmarkId::new("std", "slice"), |b| {
        b.iter(|| {
            for key in &keys {
                black_box(data.binary_search(black_box(key)).is_ok());
            }
        })
    });
    group.bench_function(BenchmarkId::new("generic", "vec"), |b| {
        b.iter(|| {
            for key in &keys {
                black_box(binary_search(&data, black_box(key)).is_ok());
            }
        })
    });
    group.bench_function(BenchmarkId::new("generic", "vec_deque"), |b| {
        b.iter(|| {
            for key in &keys {
                black_box(binary_search(&deque, black_box(key)).is_ok());
            }
        })
    });
    group.bench_function(BenchmarkId::new("generic_comparer", "vec"), |b| {
        b.iter(|| {
            for key in &keys {
                black_box(binary_search_with(&data, black_box(key), &by_value).is_ok());
            }
        })
    });
    group.finish();
}

criterion_group!(benches, search);
criterion_main!(benches);
