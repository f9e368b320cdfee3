use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dataset::Dataset;
use stddev::BenchParams;
use store::{save, traverse, SaveOptions};
use tempfile::tempdir;

const N_SAVES: usize = 200;

fn payload() -> Dataset {
    let values: Vec<f64> = (0..38).map(|i| i as f64 * 0.5).collect();
    Dataset::new(vec![2, 19], &values).unwrap()
}

fn leaf(i: usize) -> String {
    format!("2024.01.01.0000.{:02}.{:03}", i / 1000, i % 1000)
}

fn locked_save_benchmark(c: &mut Criterion) {
    let data = payload();
    c.bench_function("locked_save_200", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.bsc");
                (dir, path)
            },
            |(_dir, path)| {
                let opts = SaveOptions::default().with_sync(false);
                for i in 0..N_SAVES {
                    save(&data, &path, "result", &leaf(i), &opts).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn collective_save_benchmark(c: &mut Criterion) {
    let data = payload();
    c.bench_function("collective_save_200", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.bsc");
                (dir, path)
            },
            |(_dir, path)| {
                let opts = SaveOptions::collective();
                for i in 0..N_SAVES {
                    save(&data, &path, "result/rank-0", &leaf(i), &opts).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn traverse_benchmark(c: &mut Criterion) {
    c.bench_function("traverse_200", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.bsc");
                let opts = SaveOptions::unlocked().with_sync(false);
                for i in 0..N_SAVES {
                    save(&payload(), &path, "result", &leaf(i), &opts).unwrap();
                }
                (dir, path)
            },
            |(_dir, path)| {
                assert_eq!(traverse(&path).unwrap().count(), N_SAVES);
            },
            BatchSize::SmallInput,
        );
    });
}

fn stddev_benchmark(c: &mut Criterion) {
    let params = BenchParams::default().with_repeats(1);
    c.bench_function("stddev_payload_repeats_1", |b| {
        b.iter(|| stddev::benchmark(&params, 746574366).unwrap());
    });
}

criterion_group!(
    benches,
    locked_save_benchmark,
    collective_save_benchmark,
    traverse_benchmark,
    stddev_benchmark
);
criterion_main!(benches);
