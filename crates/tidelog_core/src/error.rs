//! Error types for Tidelog core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tidelog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidelog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record's stored checksum does not match its key and value bytes.
    #[error("corrupt record at offset {offset}: expected crc {expected:08x}, got {actual:08x}")]
    CorruptRecord {
        /// Offset stored in the corrupt frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the stored bytes.
        actual: u32,
    },

    /// Segment framing is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Requested offset is outside the retained range of a partition.
    #[error(
        "offset {requested} out of range: earliest {earliest}, high watermark {high_watermark}"
    )]
    OffsetOutOfRange {
        /// The offset the caller asked for.
        requested: u64,
        /// Earliest offset still retained.
        earliest: u64,
        /// Next offset to be assigned.
        high_watermark: u64,
    },

    /// A new active segment could not be created. No offset was assigned.
    #[error("failed to roll segment at base offset {base_offset}: {source}")]
    SegmentRotationFailure {
        /// Base offset the new segment would have had.
        base_offset: u64,
        /// Underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A compaction pass was aborted. The original segments are still authoritative.
    #[error("compaction failed: {message}")]
    CompactionFailure {
        /// Description of the failure.
        message: String,
    },

    /// A previous write failure left the partition unable to accept appends.
    #[error("partition {topic}/{partition} is degraded: {reason}")]
    PartitionDegraded {
        /// Topic name.
        topic: String,
        /// Partition id.
        partition: u32,
        /// Description of the original failure.
        reason: String,
    },

    /// Topic not found.
    #[error("topic not found: {name}")]
    TopicNotFound {
        /// Name of the topic.
        name: String,
    },

    /// Partition not found.
    #[error("partition {partition} not found in topic {topic}")]
    PartitionNotFound {
        /// Topic name.
        topic: String,
        /// Requested partition id.
        partition: u32,
    },

    /// Store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Store is closed.
    #[error("store is closed")]
    StoreClosed,

    /// Partition log is closed.
    #[error("partition is closed")]
    PartitionClosed,

    /// Invalid on-disk format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Configuration rejected.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates a compaction failure error.
    pub fn compaction_failure(message: impl Into<String>) -> Self {
        Self::CompactionFailure {
            message: message.into(),
        }
    }

    /// Creates a rotation failure wrapping the underlying error.
    pub fn rotation_failure(base_offset: u64, source: CoreError) -> Self {
        Self::SegmentRotationFailure {
            base_offset,
            source: Box::new(source),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a topic not found error.
    pub fn topic_not_found(name: impl Into<String>) -> Self {
        Self::TopicNotFound { name: name.into() }
    }

    /// Returns true if the failed call can be retried unchanged.
    ///
    /// Rotation and compaction failures leave no visible state behind.
    /// I/O failures are not retryable inside the engine: the partition is
    /// degraded and the store has to be reopened.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SegmentRotationFailure { .. } | Self::CompactionFailure { .. }
        )
    }

    /// Returns true for a per-record checksum failure.
    #[must_use]
    pub fn is_corrupt_record(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }
}
