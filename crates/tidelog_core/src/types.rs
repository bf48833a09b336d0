//! Core type definitions for Tidelog.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a partition within a topic.
///
/// Partition ids are dense: a topic with `n` partitions has ids `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// Creates a new partition ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the ID as a vector index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// Partition the router chose.
    pub partition: PartitionId,
    /// Offset assigned within that partition.
    pub offset: u64,
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_id_ordering() {
        assert!(PartitionId::new(1) < PartitionId::new(2));
        assert_eq!(PartitionId::from(3).index(), 3);
    }

    #[test]
    fn partition_id_display() {
        assert_eq!(format!("{}", PartitionId::new(7)), "partition-7");
    }

    #[test]
    fn record_position_display() {
        let pos = RecordPosition {
            partition: PartitionId::new(2),
            offset: 41,
        };
        assert_eq!(pos.to_string(), "partition-2@41");
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
