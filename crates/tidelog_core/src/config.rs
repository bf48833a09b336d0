//! Store and topic configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Per-topic configuration. Every partition of a topic shares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    /// Roll the active segment once its data file would exceed this size.
    pub segment_max_bytes: u64,

    /// Roll the active segment once it holds this many records.
    pub segment_max_records: u64,

    /// Number of records between two sparse index entries.
    pub index_interval: u32,

    /// Flush the pending batch once it holds this many records.
    pub batch_max_records: usize,

    /// Flush the pending batch this long after its first record arrived.
    pub batch_linger: Duration,

    /// Delete sealed segments whose newest record is older than this.
    pub retention_max_age: Option<Duration>,

    /// Delete the oldest sealed segments while the partition is larger than this.
    pub retention_max_bytes: Option<u64>,

    /// Keep only the latest record per key in sealed segments.
    pub compaction_enabled: bool,

    /// Whether a batch flush fsyncs the data file (safer but slower).
    pub sync_on_flush: bool,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            segment_max_bytes: 64 * 1024 * 1024, // 64 MB
            segment_max_records: 1 << 20,
            index_interval: 32,
            batch_max_records: 256,
            batch_linger: Duration::from_millis(5),
            retention_max_age: None,
            retention_max_bytes: None,
            compaction_enabled: false,
            sync_on_flush: true,
        }
    }
}

impl TopicConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum data file size of a segment.
    #[must_use]
    pub const fn segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes;
        self
    }

    /// Sets the maximum record count of a segment.
    #[must_use]
    pub const fn segment_max_records(mut self, records: u64) -> Self {
        self.segment_max_records = records;
        self
    }

    /// Sets the sparse index interval.
    #[must_use]
    pub const fn index_interval(mut self, interval: u32) -> Self {
        self.index_interval = interval;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn batch_max_records(mut self, records: usize) -> Self {
        self.batch_max_records = records;
        self
    }

    /// Sets the batch linger time.
    #[must_use]
    pub const fn batch_linger(mut self, linger: Duration) -> Self {
        self.batch_linger = linger;
        self
    }

    /// Sets the retention age limit.
    #[must_use]
    pub const fn retention_max_age(mut self, age: Duration) -> Self {
        self.retention_max_age = Some(age);
        self
    }

    /// Sets the retention size limit.
    #[must_use]
    pub const fn retention_max_bytes(mut self, bytes: u64) -> Self {
        self.retention_max_bytes = Some(bytes);
        self
    }

    /// Marks the topic as compacted.
    #[must_use]
    pub const fn compaction_enabled(mut self, value: bool) -> Self {
        self.compaction_enabled = value;
        self
    }

    /// Sets whether batch flushes fsync.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Returns true if either retention limit is set.
    #[must_use]
    pub const fn has_retention(&self) -> bool {
        self.retention_max_age.is_some() || self.retention_max_bytes.is_some()
    }

    /// Checks that the configuration is usable.
    ///
    /// Index entries store 32-bit relative offsets and byte positions, so a
    /// segment may not grow past `u32::MAX` bytes or records.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segment_max_bytes == 0 || self.segment_max_bytes > u64::from(u32::MAX) {
            return Err(CoreError::invalid_config(format!(
                "segment_max_bytes must be in 1..={}, got {}",
                u32::MAX,
                self.segment_max_bytes
            )));
        }
        if self.segment_max_records == 0 || self.segment_max_records > u64::from(u32::MAX) {
            return Err(CoreError::invalid_config(format!(
                "segment_max_records must be in 1..={}, got {}",
                u32::MAX,
                self.segment_max_records
            )));
        }
        if self.index_interval == 0 {
            return Err(CoreError::invalid_config("index_interval must be positive"));
        }
        if self.batch_max_records == 0 {
            return Err(CoreError::invalid_config(
                "batch_max_records must be positive",
            ));
        }
        if self.retention_max_bytes == Some(0) {
            return Err(CoreError::invalid_config(
                "retention_max_bytes must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration for opening a log store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether topics run their compaction and retention tasks automatically.
    pub background_tasks: bool,

    /// How often the compactor runs on each compacted partition.
    pub compaction_interval: Duration,

    /// How often retention limits are evaluated.
    pub retention_check_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            background_tasks: true,
            compaction_interval: Duration::from_secs(30),
            retention_check_interval: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Enables or disables the background maintenance tasks.
    #[must_use]
    pub const fn background_tasks(mut self, value: bool) -> Self {
        self.background_tasks = value;
        self
    }

    /// Sets the compaction interval.
    #[must_use]
    pub const fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Sets the retention check interval.
    #[must_use]
    pub const fn retention_check_interval(mut self, interval: Duration) -> Self {
        self.retention_check_interval = interval;
        self
    }

    /// Checks that the task intervals are positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first zero interval.
    pub fn validate(&self) -> CoreResult<()> {
        if self.compaction_interval.is_zero() {
            return Err(CoreError::invalid_config(
                "compaction_interval must be positive",
            ));
        }
        if self.retention_check_interval.is_zero() {
            return Err(CoreError::invalid_config(
                "retention_check_interval must be positive",
            ));
        }
        Ok(())
    }
}
