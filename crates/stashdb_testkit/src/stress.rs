//! Stress tests for stashdb.
//!
//! These helpers hammer one store from many threads and report what
//! happened. Every call goes through the store's worker, so the store must
//! stay consistent however the threads interleave.

use crate::fixtures::{call, scenarios::value_for};
use stashdb_core::{Database, Key};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 500,
            threads: 4,
            value_size: 256,
            key_count: 64,
        }
    }
}

/// Writes from every thread at once, each thread on its own keys.
///
/// Thread `t` writes keys `t * key_count .. (t + 1) * key_count`, cycling.
pub fn stress_concurrent_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                let base = t as u64 * config.key_count;
                for i in 0..config.operations {
                    let n = base + i as u64 % config.key_count.max(1);
                    let value = value_for(n, config.value_size, t as u8);
                    match call(|done| db.put_tagged(Key::new(0, n), value, done)) {
                        Some(Ok(())) => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Reads and writes shared keys from every thread at once.
///
/// Writers store [`value_for`] of the key, so any non-empty read must
/// equal it; a read of something else counts as a failure.
pub fn stress_mixed_workload(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for i in 0..config.operations {
                    let n = (i as u64 * 7 + t as u64) % config.key_count.max(1);
                    let key = Key::new(0, n);
                    let expected = value_for(n, config.value_size, 0);
                    let ok = if i % 3 == 0 {
                        call(|done| db.put_tagged(key, expected, done)) == Some(Ok(()))
                    } else {
                        match call(|done| db.get(key, done)) {
                            Some(bytes) => bytes.is_empty() || bytes == expected.bytes,
                            None => false,
                        }
                    };
                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Removes and re-puts keys from some threads while others clear tags.
pub fn stress_churn(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for i in 0..config.operations {
                    let n = (i as u64 + t as u64 * 13) % config.key_count.max(1);
                    let key = Key::new(0, n);
                    let result = match (t + i) % 5 {
                        0 => call(|done| db.remove(key, done)),
                        1 => call(|done| db.clear_by_tag((n % 3) as u8, done)),
                        _ => {
                            let value = value_for(n, config.value_size, (n % 3) as u8);
                            call(|done| db.put_tagged(key, value, done))
                        }
                    };
                    match result {
                        Some(Ok(())) => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    fn small_config() -> StressConfig {
        StressConfig {
            operations: 100,
            threads: 4,
            value_size: 64,
            key_count: 16,
        }
    }

    #[test]
    fn concurrent_writes_all_land() {
        let mut store = TestStore::opened();
        let config = small_config();
        let result = stress_concurrent_writes(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, config.operations * config.threads);

        store.restart().unwrap();
        let stats = store.current_stats();
        assert_eq!(stats.full.count, config.key_count * config.threads as u64);
        for t in 0..config.threads as u64 {
            let n = t * config.key_count;
            assert_eq!(
                store.get_tagged(Key::new(0, n)),
                value_for(n, config.value_size, t as u8)
            );
        }
    }

    #[test]
    fn mixed_workload_never_reads_foreign_bytes() {
        let store = TestStore::opened();
        let result = stress_mixed_workload(&store, &small_config());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn churn_leaves_a_consistent_store() {
        let mut store = TestStore::opened();
        let config = small_config();
        let result = stress_churn(&store, &config);
        assert_eq!(result.failed_ops, 0);

        store.wait_for_cleaner();
        let before = store.current_stats();
        let values: Vec<_> = (0..config.key_count)
            .map(|n| store.get_tagged(Key::new(0, n)))
            .collect();

        store.restart().unwrap();
        assert_eq!(store.current_stats().full, before.full);
        for (n, value) in values.iter().enumerate() {
            assert_eq!(&store.get_tagged(Key::new(0, n as u64)), value);
        }
    }
}
