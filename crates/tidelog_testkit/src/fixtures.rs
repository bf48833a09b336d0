//! Test fixtures and store helpers.
//!
//! Provides temporary stores that clean up after themselves and a few
//! pre-populated scenarios.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tidelog_core::{LogStore, PartitionId, SegmentFiles, StoreConfig, Topic, TopicConfig};
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Store configuration without background threads, so tests control every
/// compaction and retention pass.
#[must_use]
pub fn quiet_config() -> StoreConfig {
    StoreConfig::default().background_tasks(false)
}

/// Topic configuration that flushes every batch as soon as it is queued.
#[must_use]
pub fn eager_topic_config() -> TopicConfig {
    TopicConfig::default().batch_linger(Duration::ZERO)
}

/// A log store in a temporary directory.
pub struct TestStore {
    /// The store instance.
    pub store: LogStore,
    config: StoreConfig,
    temp_dir: TempDir,
}

impl TestStore {
    /// Creates a store with background tasks disabled.
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    /// Creates a store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LogStore::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open store");
        Self {
            store,
            config,
            temp_dir,
        }
    }

    /// Returns the store root.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Closes the store and opens it again on the same directory.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            config,
            temp_dir,
        } = self;
        store.close().expect("Failed to close store");
        drop(store);
        let store = LogStore::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to reopen store");
        Self {
            store,
            config,
            temp_dir,
        }
    }

    /// Closes the store and hands back the directory, for tests that edit
    /// files while nothing holds them open.
    pub fn into_closed_dir(self) -> (TempDir, StoreConfig) {
        self.store.close().expect("Failed to close store");
        (self.temp_dir, self.config)
    }

    /// Opens or creates a topic.
    pub fn topic(&self, name: &str, partitions: u32, config: TopicConfig) -> Arc<Topic> {
        self.store
            .open_topic(name, partitions, config)
            .expect("Failed to open topic")
    }

    /// Directory of one partition.
    pub fn partition_dir(&self, topic: &str, partition: PartitionId) -> PathBuf {
        partition_dir(self.path(), topic, partition)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = LogStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Directory of one partition under a store root.
pub fn partition_dir(root: &Path, topic: &str, partition: PartitionId) -> PathBuf {
    root.join(topic).join(format!("partition-{}", partition.as_u32()))
}

/// Data file of the segment starting at `base_offset`.
pub fn segment_log_path(root: &Path, topic: &str, partition: PartitionId, base_offset: u64) -> PathBuf {
    SegmentFiles::new(&partition_dir(root, topic, partition), base_offset).log
}

/// Runs a test with a temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use tidelog_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.open_topic("events", 1, TopicConfig::default()).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LogStore) -> R,
{
    let test_store = TestStore::new();
    f(&test_store.store)
}

/// Runs a test with a temporary store and its root directory.
pub fn with_temp_store_path<F, R>(f: F) -> R
where
    F: FnOnce(&LogStore, &Path) -> R,
{
    let test_store = TestStore::new();
    f(&test_store.store, test_store.path())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Value written for the `i`th record of a scenario.
    pub fn scenario_value(i: usize) -> Bytes {
        Bytes::from(format!(r#"{{"index":{i}}}"#))
    }

    /// A single-partition topic holding `records` keyless records.
    pub fn populated_topic(records: usize, config: TopicConfig) -> (TestStore, Arc<Topic>) {
        let test_store = TestStore::new();
        let topic = test_store.topic("events", 1, config);
        for i in 0..records {
            topic
                .append(None, scenario_value(i))
                .expect("Failed to append record");
        }
        (test_store, topic)
    }

    /// A compacted single-partition topic fed `records` updates cycling
    /// through `keys` distinct keys.
    pub fn keyed_topic(records: usize, keys: usize, config: TopicConfig) -> (TestStore, Arc<Topic>) {
        let test_store = TestStore::new();
        let topic = test_store.topic("table", 1, config.compaction_enabled(true));
        for i in 0..records {
            let key = Bytes::from(format!("key-{}", i % keys.max(1)));
            topic
                .append(Some(key), scenario_value(i))
                .expect("Failed to append record");
        }
        (test_store, topic)
    }

    /// Several topics with `partitions` partitions each and one record per
    /// partition.
    pub fn multi_topic_store(topics: usize, partitions: u32) -> (TestStore, Vec<Arc<Topic>>) {
        let test_store = TestStore::new();
        let mut opened = Vec::with_capacity(topics);
        for t in 0..topics {
            let topic = test_store.topic(&format!("topic_{t}"), partitions, TopicConfig::default());
            for p in topic.list_partitions() {
                topic
                    .partition(p)
                    .and_then(|log| log.append(None, scenario_value(p.index())))
                    .expect("Failed to append record");
            }
            opened.push(topic);
        }
        (test_store, opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_store() {
        let test_store = TestStore::new();
        assert!(test_store.is_open());
        assert!(test_store.topic_names().is_empty());
    }

    #[test]
    fn test_with_temp_store() {
        with_temp_store(|store| {
            store.open_topic("events", 2, TopicConfig::default()).unwrap();
            assert_eq!(store.topic_names(), vec!["events".to_string()]);
        });
    }

    #[test]
    fn test_reopen_keeps_records() {
        let (test_store, topic) = scenarios::populated_topic(5, TopicConfig::default());
        drop(topic);
        let test_store = test_store.reopen();
        assert_eq!(test_store.high_watermark("events", PartitionId::new(0)).unwrap(), 5);
    }

    #[test]
    fn test_segment_path_layout() {
        let (test_store, _topic) = scenarios::populated_topic(1, TopicConfig::default());
        let path = segment_log_path(test_store.path(), "events", PartitionId::new(0), 0);
        assert!(path.ends_with("events/partition-0/00000000000000000000.log"));
        assert!(path.exists());
    }

    #[test]
    fn test_multi_topic_scenario() {
        let (test_store, topics) = scenarios::multi_topic_store(3, 2);
        assert_eq!(topics.len(), 3);
        assert_eq!(test_store.topic_names().len(), 3);
        for topic in &topics {
            for p in topic.list_partitions() {
                assert_eq!(topic.high_watermark(p).unwrap(), 1);
            }
        }
    }
}
