//! Restart recovery benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::random_data;
use tessera_testkit::{page, setup_pages, TestEngine};

const PAGES: u64 = 16;

/// Build an engine with `committed` committed transactions and one loser.
fn crashed_engine(committed: usize) -> TestEngine {
    let engine = TestEngine::memory();
    setup_pages(&engine, PAGES).unwrap();
    for i in 0..committed {
        let txn = engine.begin();
        engine
            .write(&txn, page(i as u64 % PAGES), 0, &random_data(32))
            .unwrap();
        engine.commit(&txn).unwrap();
    }
    let loser = engine.begin();
    for i in 0..PAGES {
        engine.write(&loser, page(i), 64, &random_data(32)).unwrap();
    }
    engine.flush_log().unwrap();
    engine
}

/// Benchmark a full restart over logs of increasing length.
fn bench_restart(c: &mut Criterion) {
    let mut group = c.benchmark_group("restart");
    group.sample_size(20);

    for count in [10usize, 100, 500].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let engine = crashed_engine(count);
            b.iter(|| {
                let recovered = engine.crash_and_recover().unwrap();
                criterion::black_box(recovered);
            });
        });
    }

    group.finish();
}

/// Benchmark taking a checkpoint with many active transactions.
fn bench_checkpoint(c: &mut Criterion) {
    let engine = TestEngine::memory();
    setup_pages(&engine, PAGES).unwrap();
    let open: Vec<_> = (0..PAGES)
        .map(|i| {
            let txn = engine.begin();
            engine.write(&txn, page(i), 0, &random_data(16)).unwrap();
            txn
        })
        .collect();

    c.bench_function("checkpoint_16_active", |b| {
        b.iter(|| engine.recovery.checkpoint().unwrap());
    });

    drop(open);
}

criterion_group!(benches, bench_restart, bench_checkpoint);
criterion_main!(benches);
