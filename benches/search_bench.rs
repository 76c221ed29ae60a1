use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use graphite_db::index::HnswIndex;

fn deterministic_vector(seed: usize, dims: usize) -> Vec<f32> {
    (0..dims).map(|i| ((seed * 31 + i * 17) % 997) as f32 / 997.0).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_insert");
    for size in [100usize, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut index = HnswIndex::new().unwrap();
                for i in 0..size {
                    let v = deterministic_vector(i, 64);
                    index.add(&format!("k{i}"), &v).unwrap();
                }
                black_box(index.len());
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");
    for size in [1_000usize, 10_000] {
        let mut index = HnswIndex::new().unwrap();
        for i in 0..size {
            let v = deterministic_vector(i, 64);
            index.add(&format!("k{i}"), &v).unwrap();
        }
        let query = deterministic_vector(size / 2, 64);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(index.search(&query, 10).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search);
criterion_main!(benches);
