//! # Tidelog Core
//!
//! Embeddable append-only commit-log engine.
//!
//! This crate provides:
//! - A checksummed record codec and sparse offset index
//! - Segments that are appended while active and immutable once sealed
//! - Partition logs with batched durable writes and segment rotation
//! - Pull-based reads by explicit offset, across segment boundaries
//! - Key-based compaction and age/size retention
//! - Topics that route records to partitions by key
//! - A [`LogStore`] registry that owns a store directory
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidelog_core::{LogStore, PartitionId, TopicConfig};
//! use std::path::Path;
//!
//! let store = LogStore::open(Path::new("my_log"))?;
//! store.open_topic("events", 1, TopicConfig::default())?;
//! store.append("events", None, "hello".into())?;
//!
//! let batch = store.pull("events", PartitionId::new(0), 0, 10)?;
//! for record in batch.records() {
//!     println!("{record}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod dir;
mod error;
mod manifest;
mod partition;
mod retention;
mod router;
mod segment;
mod store;
mod task;
mod topic;
mod types;

pub use compaction::{CompactionReport, Compactor, Decision, OffsetMap};
pub use config::{StoreConfig, TopicConfig};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use manifest::TopicManifest;
pub use partition::{
    AppendTicket, PartitionLog, PullBatch, SegmentList, SwapMarker, CHECKPOINT_FILE,
    SWAP_MARKER_FILE,
};
pub use retention::{RetentionPolicy, RetentionReport};
pub use router::{murmur2, Router};
pub use segment::{
    compute_crc, frame_size, parse_base_offset, IndexEntry, OffsetIndex, Record, Segment,
    SegmentFiles, CLEANED_SUFFIX, HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_EXTENSION, LENGTH_SIZE,
    LOG_EXTENSION,
};
pub use store::LogStore;
pub use task::{BackgroundTask, CancelToken};
pub use topic::{validate_topic_name, Topic, MAX_TOPIC_NAME_LEN};
pub use types::{now_millis, PartitionId, RecordPosition};
