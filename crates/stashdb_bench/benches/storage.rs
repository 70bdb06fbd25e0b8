//! Encrypted file benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stashdb_bench::random_data;
use stashdb_storage::{random_salt, EncryptedFile, EncryptionKey, Mode};
use tempfile::TempDir;

/// Benchmark in-place CTR encryption of block-aligned spans.
fn bench_ctr_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("ctr_encrypt");
    let state = EncryptionKey::generate().prepare_ctr_state(&random_salt());

    for size in [64, 1024, 16 * 1024, 256 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut data = random_data(size);
            b.iter(|| {
                state.encrypt(black_box(&mut data), 4096);
            });
        });
    }

    group.finish();
}

/// Benchmark deriving a file's CTR state from the key and salt.
fn bench_prepare_state(c: &mut Criterion) {
    let key = EncryptionKey::generate();
    let salt = random_salt();
    c.bench_function("prepare_ctr_state", |b| {
        b.iter(|| black_box(key.prepare_ctr_state(black_box(&salt))));
    });
}

/// Benchmark writing a value file: create, header, padded payload.
fn bench_value_file_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_file_write");
    group.sample_size(50);
    let key = EncryptionKey::generate();

    for size in [256, 4096, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("value");
            let data = random_data(size);

            b.iter(|| {
                let mut file = EncryptedFile::open(&path, Mode::Write, &key).unwrap();
                assert!(file.write_with_padding(black_box(&data)));
            });
        });
    }

    group.finish();
}

/// Benchmark reading a value file back.
fn bench_value_file_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_file_read");
    group.sample_size(50);
    let key = EncryptionKey::generate();

    for size in [256, 4096, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("value");
            {
                let mut file = EncryptedFile::open(&path, Mode::Write, &key).unwrap();
                assert!(file.write_with_padding(&random_data(size)));
            }

            b.iter(|| {
                let mut file = EncryptedFile::open(&path, Mode::Read, &key).unwrap();
                black_box(file.read_with_padding(size).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ctr_encrypt,
    bench_prepare_state,
    bench_value_file_write,
    bench_value_file_read,
);
criterion_main!(benches);
