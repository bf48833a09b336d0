//! Stress tests for Tidelog.
//!
//! These helpers drive a topic under heavy load and concurrent producers,
//! then check that offsets stayed gapless.

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tidelog_core::{PartitionId, PartitionLog, Topic};

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

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
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
    /// Number of records to append.
    pub operations: usize,
    /// Number of concurrent producers.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys; zero appends keyless records.
    pub key_space: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_space: 0,
        }
    }
}

impl StressConfig {
    fn key(&self, i: usize) -> Option<Bytes> {
        (self.key_space > 0).then(|| Bytes::from(format!("key-{}", i % self.key_space)))
    }
}

/// Appends `config.operations` records from one thread.
pub fn stress_sequential_appends(topic: &Topic, config: &StressConfig) -> StressTestResult {
    let value = Bytes::from(vec![0xABu8; config.value_size]);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match topic.append(config.key(i), value.clone()) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends from `config.threads` producers at once.
pub fn stress_concurrent_appends(topic: &Topic, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let per_thread = config.operations / config.threads.max(1);
    let value = Bytes::from(vec![0xCDu8; config.value_size]);

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed, value) = (&successful, &failed, value.clone());
            scope.spawn(move || {
                for i in 0..per_thread {
                    match topic.append(config.key(t * per_thread + i), value.clone()) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Appends from one producer while `config.threads` readers tail the
/// partition. Each successful pull counts as an operation.
pub fn stress_tail_while_appending(log: &PartitionLog, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let value = Bytes::from(vec![0xEFu8; config.value_size]);
    let target = log.high_watermark() + config.operations as u64;
    let done = AtomicBool::new(false);

    let start = Instant::now();
    thread::scope(|scope| {
        for _ in 0..config.threads {
            let (successful, failed, done) = (&successful, &failed, &done);
            scope.spawn(move || {
                let mut cursor = log.earliest_offset();
                while cursor < target {
                    match log.pull(cursor, 64) {
                        Ok(batch) => {
                            cursor = batch.next_offset;
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                    if done.load(Ordering::Acquire) && cursor >= log.high_watermark() {
                        return;
                    }
                    thread::yield_now();
                }
            });
        }
        for i in 0..config.operations {
            if log.append(config.key(i), value.clone()).is_err() {
                failed.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Checks that a partition holds every offset in
/// `[earliest_offset, high_watermark)` exactly once, in order.
///
/// Only valid for partitions that were never compacted.
pub fn verify_gapless(log: &PartitionLog) -> Result<u64, String> {
    let mut expected = log.earliest_offset();
    let end = log.high_watermark();
    while expected < end {
        let batch = log
            .pull(expected, 1_024)
            .map_err(|e| format!("pull from {expected} failed: {e}"))?;
        if batch.is_empty() {
            return Err(format!("empty pull at {expected}, high watermark {end}"));
        }
        for entry in batch.entries {
            let record = entry.map_err(|e| format!("unreadable record near {expected}: {e}"))?;
            if record.offset != expected {
                return Err(format!("expected offset {expected}, found {}", record.offset));
            }
            expected += 1;
        }
    }
    Ok(expected)
}

/// Checks every partition of a topic with [`verify_gapless`] and returns
/// the total record count.
pub fn verify_topic_gapless(topic: &Topic) -> Result<u64, String> {
    let mut total = 0;
    for id in topic.list_partitions() {
        let log = topic.partition(id).map_err(|e| e.to_string())?;
        total += verify_gapless(log)? - log.earliest_offset();
    }
    Ok(total)
}

/// Checks that the offsets handed to producers are unique.
pub fn verify_unique_positions(positions: &[(PartitionId, u64)]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(positions.len());
    for position in positions {
        if !seen.insert(*position) {
            return Err(format!(
                "offset {} assigned twice on partition {}",
                position.1, position.0
            ));
        }
    }
    Ok(())
}
