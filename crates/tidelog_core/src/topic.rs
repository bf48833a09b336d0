//! Topics: a fixed set of partitions behind a key router.

use crate::compaction::CompactionReport;
use crate::config::{StoreConfig, TopicConfig};
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::manifest::TopicManifest;
use crate::partition::{PartitionLog, PullBatch};
use crate::retention::RetentionReport;
use crate::router::Router;
use crate::task::BackgroundTask;
use crate::types::{now_millis, PartitionId, RecordPosition};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Longest topic name accepted.
pub const MAX_TOPIC_NAME_LEN: usize = 249;

/// Checks that `name` can be used as a topic and directory name.
///
/// Names are 1 to 249 characters of ASCII letters, digits, `.`, `_` and
/// `-`, and may not be `.` or `..`.
///
/// # Errors
///
/// Returns `InvalidConfig` describing the first problem found.
pub fn validate_topic_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_config("topic name cannot be empty"));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(CoreError::invalid_config(format!(
            "topic name is {} characters, the limit is {MAX_TOPIC_NAME_LEN}",
            name.len()
        )));
    }
    if name == "." || name == ".." {
        return Err(CoreError::invalid_config(format!(
            "topic name cannot be '{name}'"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(CoreError::invalid_config(format!(
            "topic name '{name}' contains invalid character '{c}'"
        )));
    }
    Ok(())
}

/// A named, fixed-size set of partitions.
///
/// Keyed records always land on the partition their key hashes to, so
/// records sharing a key keep their relative order. Keyless records are
/// spread round-robin.
pub struct Topic {
    name: String,
    config: TopicConfig,
    partitions: Vec<Arc<PartitionLog>>,
    router: Router,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Topic {
    /// Opens every partition of the topic described by `manifest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is invalid or a partition fails to
    /// open.
    pub fn open(dir: &StoreDir, manifest: &TopicManifest) -> CoreResult<Self> {
        validate_topic_name(&manifest.name)?;
        if manifest.partitions == 0 {
            return Err(CoreError::invalid_config(
                "a topic needs at least one partition",
            ));
        }
        manifest.config.validate()?;

        let mut partitions = Vec::with_capacity(manifest.partitions as usize);
        for id in (0..manifest.partitions).map(PartitionId::new) {
            let log = PartitionLog::open(
                manifest.name.as_str(),
                id,
                &dir.partition_dir(&manifest.name, id),
                manifest.config.clone(),
            )?;
            partitions.push(Arc::new(log));
        }

        Ok(Self {
            name: manifest.name.clone(),
            config: manifest.config.clone(),
            router: Router::new(manifest.partitions),
            partitions,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the compaction and retention tasks the configuration asks for.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn start_background_tasks(&self, store: &StoreConfig) -> CoreResult<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Ok(());
        }

        for log in &self.partitions {
            if self.config.compaction_enabled {
                let weak = Arc::downgrade(log);
                tasks.push(BackgroundTask::spawn_periodic(
                    format!("tidelog-compact-{}-{}", self.name, log.id().as_u32()),
                    store.compaction_interval,
                    move |token| {
                        if let Some(log) = Weak::upgrade(&weak) {
                            if let Err(e) = log.compact_with(token) {
                                warn!(
                                    topic = log.topic(),
                                    partition = %log.id(),
                                    error = %e,
                                    "compaction pass failed"
                                );
                            }
                        }
                    },
                )?);
            }

            if self.config.has_retention() {
                let weak = Arc::downgrade(log);
                tasks.push(BackgroundTask::spawn_periodic(
                    format!("tidelog-retain-{}-{}", self.name, log.id().as_u32()),
                    store.retention_check_interval,
                    move |_| {
                        if let Some(log) = Weak::upgrade(&weak) {
                            if let Err(e) = log.apply_retention(now_millis()) {
                                warn!(
                                    topic = log.topic(),
                                    partition = %log.id(),
                                    error = %e,
                                    "retention pass failed"
                                );
                            }
                        }
                    },
                )?);
            }
        }

        debug!(topic = %self.name, tasks = tasks.len(), "started background tasks");
        Ok(())
    }

    /// Topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic configuration.
    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        self.router.partition_count()
    }

    /// Ids of every partition, in order.
    #[must_use]
    pub fn list_partitions(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.id()).collect()
    }

    /// The router used by [`Topic::append`].
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns one partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotFound` if `id` is out of range.
    pub fn partition(&self, id: PartitionId) -> CoreResult<&Arc<PartitionLog>> {
        self.partitions
            .get(id.index())
            .ok_or_else(|| CoreError::PartitionNotFound {
                topic: self.name.clone(),
                partition: id.as_u32(),
            })
    }

    /// Every partition, in id order.
    #[must_use]
    pub fn partitions(&self) -> &[Arc<PartitionLog>] {
        &self.partitions
    }

    /// Routes a record and appends it, waiting until it is durable.
    ///
    /// # Errors
    ///
    /// See [`PartitionLog::append`].
    pub fn append(&self, key: Option<Bytes>, value: Bytes) -> CoreResult<RecordPosition> {
        let partition = self.router.route(key.as_deref());
        let offset = self.partition(partition)?.append(key, value)?;
        Ok(RecordPosition { partition, offset })
    }

    /// Appends a delete marker for `key` on the partition that owns it.
    ///
    /// # Errors
    ///
    /// See [`PartitionLog::append_tombstone`].
    pub fn append_tombstone(&self, key: Bytes) -> CoreResult<RecordPosition> {
        if key.is_empty() {
            return Err(CoreError::invalid_operation("a tombstone needs a key"));
        }
        let partition = self.router.partition_for_key(&key);
        let offset = self.partition(partition)?.append_tombstone(key)?;
        Ok(RecordPosition { partition, offset })
    }

    /// Reads from one partition.
    ///
    /// # Errors
    ///
    /// `PartitionNotFound`, or see [`PartitionLog::pull`].
    pub fn pull(&self, partition: PartitionId, from: u64, max_records: usize) -> CoreResult<PullBatch> {
        self.partition(partition)?.pull(from, max_records)
    }

    /// High watermark of one partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotFound` if `partition` is out of range.
    pub fn high_watermark(&self, partition: PartitionId) -> CoreResult<u64> {
        Ok(self.partition(partition)?.high_watermark())
    }

    /// Earliest retained offset of one partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotFound` if `partition` is out of range.
    pub fn earliest_offset(&self, partition: PartitionId) -> CoreResult<u64> {
        Ok(self.partition(partition)?.earliest_offset())
    }

    /// Flushes every partition.
    ///
    /// # Errors
    ///
    /// Returns the first flush error; every partition is still attempted.
    pub fn flush(&self) -> CoreResult<()> {
        let mut first_error = None;
        for log in &self.partitions {
            if let Err(e) = log.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Runs one compaction pass on every partition.
    ///
    /// # Errors
    ///
    /// Returns the first failing pass.
    pub fn compact(&self) -> CoreResult<Vec<CompactionReport>> {
        self.partitions.iter().map(|log| log.compact()).collect()
    }

    /// Applies the retention policy to every partition.
    ///
    /// # Errors
    ///
    /// Returns the first failing pass.
    pub fn apply_retention(&self, now_ms: i64) -> CoreResult<Vec<RetentionReport>> {
        self.partitions
            .iter()
            .map(|log| log.apply_retention(now_ms))
            .collect()
    }

    /// Stops background tasks and closes every partition.
    ///
    /// # Errors
    ///
    /// Returns the first close error; every partition is still closed.
    pub fn close(&self) -> CoreResult<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            task.stop();
        }

        let mut first_error = None;
        for log in &self.partitions {
            if let Err(e) = log.close() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(topic = %self.name, error = %e, "failed to close topic");
        }
    }
}
