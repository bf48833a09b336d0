//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, workloads and topic names
//! that satisfy the engine's input rules.

use bytes::Bytes;
use proptest::prelude::*;
use tidelog_core::{Record, MAX_TOPIC_NAME_LEN};

/// Strategy for generating valid topic names.
pub fn topic_name_strategy() -> impl Strategy<Value = String> {
    let pattern = format!("[a-zA-Z0-9._-]{{1,{}}}", MAX_TOPIC_NAME_LEN.min(64));
    prop::string::string_regex(&pattern)
        .expect("Invalid regex")
        .prop_filter("Dot names are reserved", |s| s != "." && s != "..")
}

/// Strategy for generating non-empty keys from a small key space, so
/// workloads overwrite keys often enough to give compaction work.
pub fn key_strategy(key_space: usize) -> impl Strategy<Value = Bytes> {
    (0..key_space.max(1)).prop_map(|k| Bytes::from(format!("key-{k}")))
}

/// Strategy for generating record values (arbitrary bytes).
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..512).prop_map(Bytes::from)
}

/// Strategy for generating a well-formed record.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        any::<u64>(),
        any::<i64>(),
        prop::option::of(prop::collection::vec(any::<u8>(), 1..64)),
        value_strategy(),
    )
        .prop_map(|(offset, timestamp, key, value)| {
            Record::new(offset, timestamp, key.map(Bytes::from), value)
        })
}

/// One step of a generated partition workload.
#[derive(Debug, Clone)]
pub enum LogOperation {
    /// Append a record
    Append {
        /// Record key
        key: Option<Bytes>,
        /// Record value
        value: Bytes,
    },
    /// Append a tombstone
    Tombstone {
        /// Key to delete
        key: Bytes,
    },
    /// Run one compaction pass
    Compact,
    /// Flush pending appends
    Flush,
}

impl LogOperation {
    /// Returns true if this operation assigns an offset.
    #[must_use]
    pub fn appends(&self) -> bool {
        matches!(self, Self::Append { .. } | Self::Tombstone { .. })
    }
}

/// Strategy for generating log operations over `key_space` keys.
pub fn log_operation_strategy(key_space: usize) -> impl Strategy<Value = LogOperation> {
    prop_oneof![
        6 => (prop::option::of(key_strategy(key_space)), value_strategy())
            .prop_map(|(key, value)| LogOperation::Append { key, value }),
        1 => key_strategy(key_space).prop_map(|key| LogOperation::Tombstone { key }),
        1 => Just(LogOperation::Compact),
        1 => Just(LogOperation::Flush),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
    key_space: usize,
) -> impl Strategy<Value = Vec<LogOperation>> {
    prop::collection::vec(log_operation_strategy(key_space), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for disk-backed tests, which are slow per case.
    #[must_use]
    pub fn disk() -> Self {
        Self {
            cases: 8,
            max_shrink_iters: 50,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
