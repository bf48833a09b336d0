//! Benchmark utilities.

use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidelog_core::{LogStore, Record, StoreConfig, Topic, TopicConfig};

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` keys drawn from `key_space` distinct values.
pub fn generate_keys(count: usize, key_space: usize) -> Vec<Bytes> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| Bytes::from(format!("key-{}", rng.gen_range(0..key_space.max(1)))))
        .collect()
}

/// Generate records with consecutive offsets and the given payload size.
pub fn generate_records(count: usize, payload_size: usize, keyed: bool) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let key = keyed.then(|| Bytes::from(format!("key-{}", i % 64)));
            Record::new(
                i as u64,
                1_700_000_000_000 + i as i64,
                key,
                Bytes::from(random_data(payload_size)),
            )
        })
        .collect()
}

/// A store in a temporary directory, with background tasks off.
pub struct BenchStore {
    /// The open store.
    pub store: LogStore,
    _temp_dir: TempDir,
}

impl BenchStore {
    /// Opens an empty store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = LogStore::open_with_config(
            temp_dir.path(),
            StoreConfig::default().background_tasks(false),
        )
        .unwrap();
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Opens a topic whose batches flush as soon as they are queued.
    pub fn topic(&self, name: &str, partitions: u32, config: TopicConfig) -> Arc<Topic> {
        self.store
            .open_topic(name, partitions, config.batch_linger(Duration::ZERO))
            .unwrap()
    }
}

impl Default for BenchStore {
    fn default() -> Self {
        Self::new()
    }
}
