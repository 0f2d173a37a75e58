use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rand_split::rbg::philox4x32_10;
use rand_split::threefry::{threefry2x32_rolled, threefry2x32_unrolled};
use rand_split::*;

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("threefry2x32_rolled", |b| b.iter(|| threefry2x32_rolled(black_box([1, 2]), black_box([3, 4]))));
    c.bench_function("threefry2x32_unrolled", |b| b.iter(|| threefry2x32_unrolled(black_box([1, 2]), black_box([3, 4]))));
    c.bench_function("philox4x32_10", |b| b.iter(|| philox4x32_10(black_box([1, 2]), black_box([3, 4, 5, 6]))));

    let key = seed(0, &THREEFRY_PRNG_IMPL).unwrap();
    c.bench_function("split 1024", |b| b.iter(|| key.split(black_box(1024)).unwrap()));
    let keys = key.split(64).unwrap();
    c.bench_function("fold_in 64 keys", |b| b.iter(|| keys.fold_in(black_box(7)).unwrap()));
    c.bench_function("random_bits fry 32x4096", |b| b.iter(|| key.random_bits(32, black_box(&[4096])).unwrap()));
    let rbg = seed(0, &RBG_PRNG_IMPL).unwrap();
    c.bench_function("random_bits rbg 32x4096", |b| b.iter(|| rbg.random_bits(32, black_box(&[4096])).unwrap()));

    let mut stream = KeyStream::new(key.clone()).unwrap();
    c.bench_function("KeyStream::next_u32", move |b| b.iter(|| stream.next_u32()));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
