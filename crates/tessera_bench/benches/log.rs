//! Write-ahead log benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tessera_bench::update_records;
use tessera_core::log::LogManager;
use tessera_core::{Config, TransactionId};
use tessera_storage::{FileBackend, InMemoryBackend};

/// Benchmark appending update records to an in-memory log.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");

    for size in [16, 256, 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let log = LogManager::open(Box::new(InMemoryBackend::new()), &Config::default()).unwrap();
            let records = update_records(TransactionId::new(1), 64, size);
            let mut i = 0;

            b.iter(|| {
                let lsn = log.append(black_box(&records[i % records.len()])).unwrap();
                i += 1;
                black_box(lsn);
            });
        });
    }

    group.finish();
}

/// Benchmark forcing the log to a file after each append.
fn bench_append_flush_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append_flush_file");

    // Use larger sample size for file operations
    group.sample_size(50);

    for size in [64, 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&temp_dir.path().join("bench.log")).unwrap();
            let log = LogManager::open(Box::new(backend), &Config::default()).unwrap();
            let records = update_records(TransactionId::new(1), 64, size);
            let mut i = 0;

            b.iter(|| {
                let lsn = log.append(&records[i % records.len()]).unwrap();
                log.flush_to_lsn(lsn).unwrap();
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark scanning a populated log.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_scan");

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let log = LogManager::open(Box::new(InMemoryBackend::new()), &Config::default()).unwrap();
            for record in update_records(TransactionId::new(1), count, 64) {
                log.append(&record).unwrap();
            }
            log.flush_to_lsn(log.next_lsn()).unwrap();

            b.iter(|| {
                let n = log.iter().filter_map(Result::ok).count();
                black_box(n);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append, bench_append_flush_file, bench_scan);
criterion_main!(benches);
