//! The log store: a registry of topics in one directory.

use crate::config::{StoreConfig, TopicConfig};
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::manifest::TopicManifest;
use crate::partition::PullBatch;
use crate::topic::{validate_topic_name, Topic};
use crate::types::{PartitionId, RecordPosition};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// An open log store.
///
/// `LogStore` is the entry point of the engine. It owns the store directory
/// (and its lock) and every topic opened through it.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use tidelog_core::{LogStore, TopicConfig};
/// use std::path::Path;
///
/// let store = LogStore::open(Path::new("my_log"))?;
/// store.open_topic("orders", 4, TopicConfig::default())?;
///
/// let position = store.append("orders", Some("customer-7".into()), "created".into())?;
/// let batch = store.pull("orders", position.partition, 0, 100)?;
///
/// store.close()?;
/// ```
pub struct LogStore {
    config: StoreConfig,
    dir: StoreDir,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    is_open: RwLock<bool>,
}

impl LogStore {
    /// Opens a store with default configuration.
    ///
    /// # Errors
    ///
    /// See [`LogStore::open_with_config`].
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store, locking its directory and loading every existing topic.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid (`InvalidConfig`)
    /// - Another process has the store locked (`StoreLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - A topic manifest or partition cannot be recovered
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let dir = StoreDir::open(path, config.create_if_missing)?;

        let mut topics = HashMap::new();
        for name in dir.list_topics()? {
            let Some(manifest) = dir.load_manifest(&name)? else {
                continue;
            };
            if manifest.name != name {
                return Err(CoreError::invalid_format(format!(
                    "manifest in directory '{name}' belongs to topic '{}'",
                    manifest.name
                )));
            }
            let topic = Topic::open(&dir, &manifest)?;
            if config.background_tasks {
                topic.start_background_tasks(&config)?;
            }
            topics.insert(name, Arc::new(topic));
        }

        info!(path = %path.display(), topics = topics.len(), "opened log store");

        Ok(Self {
            config,
            dir,
            topics: RwLock::new(topics),
            is_open: RwLock::new(true),
        })
    }

    /// Store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates a topic, or loads it if it already exists.
    ///
    /// Reopening an existing topic with a different configuration persists
    /// the new configuration and reopens the topic's partitions; handles to
    /// the previous instance are closed.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the name or configuration is invalid, or the
    ///   topic exists with a different partition count
    /// - `StoreClosed` if the store is closed
    /// - I/O and recovery errors
    pub fn open_topic(
        &self,
        name: &str,
        partitions: u32,
        config: TopicConfig,
    ) -> CoreResult<Arc<Topic>> {
        self.ensure_open()?;
        validate_topic_name(name)?;
        if partitions == 0 {
            return Err(CoreError::invalid_config(
                "a topic needs at least one partition",
            ));
        }
        config.validate()?;

        let mut topics = self.topics.write();
        if let Some(existing) = topics.get(name) {
            if existing.partition_count() != partitions {
                return Err(CoreError::invalid_config(format!(
                    "topic '{name}' has {} partitions, not {partitions}",
                    existing.partition_count()
                )));
            }
            if *existing.config() == config {
                return Ok(Arc::clone(existing));
            }

            info!(topic = name, "reopening topic with new configuration");
            existing.close()?;
        }

        let manifest = TopicManifest::new(name, partitions, config);
        self.dir.save_manifest(&manifest)?;
        let topic = Arc::new(Topic::open(&self.dir, &manifest)?);
        if self.config.background_tasks {
            topic.start_background_tasks(&self.config)?;
        }
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    /// Returns an open topic.
    ///
    /// # Errors
    ///
    /// Returns `TopicNotFound` if no such topic exists, or `StoreClosed`.
    pub fn topic(&self, name: &str) -> CoreResult<Arc<Topic>> {
        self.ensure_open()?;
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::topic_not_found(name))
    }

    /// Names of every topic, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Appends a record to a topic and waits until it is durable.
    ///
    /// # Errors
    ///
    /// `TopicNotFound`, `StoreClosed`, or see [`Topic::append`].
    pub fn append(&self, topic: &str, key: Option<Bytes>, value: Bytes) -> CoreResult<RecordPosition> {
        self.topic(topic)?.append(key, value)
    }

    /// Appends a delete marker for `key`.
    ///
    /// # Errors
    ///
    /// `TopicNotFound`, `StoreClosed`, or see [`Topic::append_tombstone`].
    pub fn append_tombstone(&self, topic: &str, key: Bytes) -> CoreResult<RecordPosition> {
        self.topic(topic)?.append_tombstone(key)
    }

    /// Reads up to `max_records` entries of one partition starting at `from`.
    ///
    /// # Errors
    ///
    /// `TopicNotFound`, `PartitionNotFound`, `OffsetOutOfRange`, or storage
    /// errors.
    pub fn pull(
        &self,
        topic: &str,
        partition: PartitionId,
        from: u64,
        max_records: usize,
    ) -> CoreResult<PullBatch> {
        self.topic(topic)?.pull(partition, from, max_records)
    }

    /// Next offset to be assigned in one partition.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` or `PartitionNotFound`.
    pub fn high_watermark(&self, topic: &str, partition: PartitionId) -> CoreResult<u64> {
        self.topic(topic)?.high_watermark(partition)
    }

    /// Earliest retained offset of one partition.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` or `PartitionNotFound`.
    pub fn earliest_offset(&self, topic: &str, partition: PartitionId) -> CoreResult<u64> {
        self.topic(topic)?.earliest_offset(partition)
    }

    /// Partition ids of a topic.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` or `StoreClosed`.
    pub fn list_partitions(&self, topic: &str) -> CoreResult<Vec<PartitionId>> {
        Ok(self.topic(topic)?.list_partitions())
    }

    /// Flushes every topic.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let topics: Vec<_> = self.topics.read().values().cloned().collect();
        let mut first_error = None;
        for topic in topics {
            if let Err(e) = topic.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes every topic. Later calls fail with `StoreClosed`.
    ///
    /// # Errors
    ///
    /// Returns the first error met while closing topics; every topic is
    /// still closed.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;

        let topics = std::mem::take(&mut *self.topics.write());
        let mut first_error = None;
        for (name, topic) in topics {
            if let Err(e) = topic.close() {
                warn!(topic = %name, error = %e, "failed to close topic");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path())
            .field("topics", &self.topic_names())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentFiles;
    use std::fs::OpenOptions;
    use std::time::Duration;
    use tempfile::tempdir;

    fn quiet() -> StoreConfig {
        StoreConfig::default().background_tasks(false)
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let store = LogStore::open_with_config(&path, quiet()).unwrap();
        assert!(path.join("LOCK").exists());
        assert!(store.topic_names().is_empty());
    }

    #[test]
    fn missing_directory_without_create() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("absent");
        let result = LogStore::open_with_config(&path, quiet().create_if_missing(false));
        assert!(result.is_err());
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        assert!(matches!(
            LogStore::open_with_config(temp.path(), quiet()),
            Err(CoreError::StoreLocked)
        ));
    }

    #[test]
    fn append_and_pull_through_store() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        store.open_topic("orders", 2, TopicConfig::default()).unwrap();

        let position = store
            .append("orders", Some(Bytes::from_static(b"k")), Bytes::from_static(b"v"))
            .unwrap();
        assert_eq!(position.offset, 0);
        assert_eq!(store.high_watermark("orders", position.partition).unwrap(), 1);
        assert_eq!(store.earliest_offset("orders", position.partition).unwrap(), 0);

        let batch = store.pull("orders", position.partition, 0, 10).unwrap();
        let record = batch.records().next().unwrap();
        assert_eq!(record.value, Bytes::from_static(b"v"));
        assert_eq!(
            store.list_partitions("orders").unwrap(),
            vec![PartitionId::new(0), PartitionId::new(1)]
        );
    }

    #[test]
    fn unknown_topic() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        assert!(matches!(
            store.append("nope", None, Bytes::from_static(b"v")),
            Err(CoreError::TopicNotFound { .. })
        ));
    }

    #[test]
    fn invalid_topic_arguments() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        assert!(store.open_topic("..", 1, TopicConfig::default()).is_err());
        assert!(store.open_topic("zero", 0, TopicConfig::default()).is_err());
        assert!(store
            .open_topic("bad", 1, TopicConfig::default().index_interval(0))
            .is_err());
    }

    #[test]
    fn reopen_loads_topics() {
        let temp = tempdir().unwrap();
        {
            let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
            store.open_topic("a", 1, TopicConfig::default()).unwrap();
            store.open_topic("b", 3, TopicConfig::default()).unwrap();
            for i in 0..5 {
                store.append("a", None, Bytes::from(format!("{i}"))).unwrap();
            }
            store.close().unwrap();
        }

        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        assert_eq!(store.topic_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.topic("b").unwrap().partition_count(), 3);
        assert_eq!(store.high_watermark("a", PartitionId::new(0)).unwrap(), 5);
    }

    #[test]
    fn partition_count_is_fixed() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        store.open_topic("orders", 2, TopicConfig::default()).unwrap();
        assert!(matches!(
            store.open_topic("orders", 3, TopicConfig::default()),
            Err(CoreError::InvalidConfig { .. })
        ));
        // Same arguments return the open topic.
        let again = store.open_topic("orders", 2, TopicConfig::default()).unwrap();
        assert_eq!(again.partition_count(), 2);
    }

    #[test]
    fn config_override_is_persisted() {
        let temp = tempdir().unwrap();
        let compacted = TopicConfig::default().compaction_enabled(true);
        {
            let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
            store.open_topic("orders", 1, TopicConfig::default()).unwrap();
            store.append("orders", None, Bytes::from_static(b"v")).unwrap();
            let topic = store.open_topic("orders", 1, compacted.clone()).unwrap();
            assert!(topic.config().compaction_enabled);
            assert_eq!(topic.high_watermark(PartitionId::new(0)).unwrap(), 1);
        }

        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        assert_eq!(*store.topic("orders").unwrap().config(), compacted);
    }

    #[test]
    fn failed_close_keeps_topic_registered() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        let slow = TopicConfig::default().batch_linger(Duration::from_secs(60));
        let topic = store.open_topic("orders", 1, slow).unwrap();
        let log = topic.partition(PartitionId::new(0)).unwrap();
        log.append_sync(None, Bytes::from_static(b"durable")).unwrap();
        let _pending = log.enqueue(None, Bytes::from_static(b"pending")).unwrap();

        // A failed read degrades the partition, so the pending batch cannot
        // be flushed when the topic is closed.
        let data = SegmentFiles::new(log.dir(), 0).log;
        OpenOptions::new()
            .write(true)
            .open(&data)
            .unwrap()
            .set_len(0)
            .unwrap();
        assert!(log.pull(0, 10).is_err());

        let compacted = TopicConfig::default().compaction_enabled(true);
        assert!(matches!(
            store.open_topic("orders", 1, compacted),
            Err(CoreError::PartitionDegraded { .. })
        ));
        assert!(Arc::ptr_eq(&store.topic("orders").unwrap(), &topic));
    }

    #[test]
    fn zero_task_interval_is_rejected() {
        let temp = tempdir().unwrap();
        let config = quiet().compaction_interval(Duration::ZERO);
        assert!(matches!(
            LogStore::open_with_config(temp.path(), config),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn closed_store_rejects_calls() {
        let temp = tempdir().unwrap();
        let store = LogStore::open_with_config(temp.path(), quiet()).unwrap();
        store.open_topic("orders", 1, TopicConfig::default()).unwrap();
        store.close().unwrap();

        assert!(!store.is_open());
        assert!(matches!(store.topic("orders"), Err(CoreError::StoreClosed)));
        assert!(matches!(
            store.open_topic("other", 1, TopicConfig::default()),
            Err(CoreError::StoreClosed)
        ));
        store.close().unwrap();
    }
}
