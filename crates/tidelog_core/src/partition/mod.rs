//! Partition logs.
//!
//! A partition is an ordered list of segments with exactly one active
//! segment at the end. The list is only ever changed by replacing it as a
//! whole, whether by the writer rolling a segment, by the compactor
//! installing rewritten segments, or by retention dropping old ones.
//! Readers take a snapshot of the list and never block on any of them.

mod batch;
mod log;
pub(crate) mod recovery;

pub use batch::AppendTicket;
pub use log::PartitionLog;
pub use recovery::{SwapMarker, CHECKPOINT_FILE, SWAP_MARKER_FILE};

use crate::error::{CoreError, CoreResult};
use crate::segment::{Record, Segment};
use std::sync::Arc;

/// Immutable, non-empty list of a partition's segments ordered by base offset.
///
/// The last segment is the active one.
#[derive(Debug, Clone)]
pub struct SegmentList {
    segments: Vec<Arc<Segment>>,
}

impl SegmentList {
    /// Builds a list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `segments` is empty or not ordered by
    /// base offset.
    pub fn new(segments: Vec<Arc<Segment>>) -> CoreResult<Self> {
        if segments.is_empty() {
            return Err(CoreError::invalid_operation(
                "a partition needs at least one segment",
            ));
        }
        if segments
            .windows(2)
            .any(|pair| pair[0].base_offset() >= pair[1].base_offset())
        {
            return Err(CoreError::invalid_operation(
                "segments must be ordered by base offset",
            ));
        }
        Ok(Self { segments })
    }

    /// The active segment.
    #[must_use]
    pub fn active(&self) -> &Arc<Segment> {
        &self.segments[self.segments.len() - 1]
    }

    /// All segments but the active one.
    #[must_use]
    pub fn sealed(&self) -> &[Arc<Segment>] {
        &self.segments[..self.segments.len() - 1]
    }

    /// All segments, oldest first.
    #[must_use]
    pub fn all(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Earliest offset still held.
    #[must_use]
    pub fn earliest_offset(&self) -> u64 {
        self.segments[0].base_offset()
    }

    /// Index of the segment whose range contains `offset`.
    #[must_use]
    pub fn position_of(&self, offset: u64) -> usize {
        self.segments
            .partition_point(|s| s.base_offset() <= offset)
            .saturating_sub(1)
    }

    /// Total published bytes across all segments.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size()).sum()
    }

    /// Returns a copy with `count` leading segments replaced by `replacement`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the result would be empty or unordered.
    pub fn with_prefix_replaced(
        &self,
        count: usize,
        replacement: Vec<Arc<Segment>>,
    ) -> CoreResult<Self> {
        let mut segments = replacement;
        segments.extend(self.segments.iter().skip(count).cloned());
        Self::new(segments)
    }

    /// Returns true if the list starts with exactly these segment instances.
    #[must_use]
    pub fn starts_with(&self, prefix: &[Arc<Segment>]) -> bool {
        prefix.len() <= self.segments.len()
            && prefix
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

/// Result of a pull.
#[derive(Debug)]
pub struct PullBatch {
    /// Records in offset order. A record that failed validation appears in
    /// place as `Err(CorruptRecord)`; unreadable framing as
    /// `Err(SegmentCorruption)`.
    pub entries: Vec<CoreResult<Record>>,
    /// Offset to pass to the next pull.
    pub next_offset: u64,
}

impl PullBatch {
    /// Returns true if nothing was returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, corrupt ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over the records that passed validation.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter_map(|e| e.as_ref().ok())
    }

    /// Iterates over the entries that failed validation.
    pub fn errors(&self) -> impl Iterator<Item = &CoreError> {
        self.entries.iter().filter_map(|e| e.as_ref().err())
    }

    /// Consumes the batch, dropping failed entries.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.entries.into_iter().filter_map(Result::ok).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_storage::InMemoryBackend;

    fn segment(base: u64) -> Arc<Segment> {
        Arc::new(
            Segment::from_backends(
                base,
                Box::new(InMemoryBackend::new()),
                Box::new(InMemoryBackend::new()),
                1,
                false,
            )
            .unwrap(),
        )
    }

    #[test]
    fn list_requires_segments_in_order() {
        assert!(SegmentList::new(Vec::new()).is_err());
        assert!(SegmentList::new(vec![segment(5), segment(0)]).is_err());
        assert!(SegmentList::new(vec![segment(0), segment(0)]).is_err());
    }

    #[test]
    fn position_of_finds_owning_segment() {
        let list = SegmentList::new(vec![segment(0), segment(2), segment(4)]).unwrap();
        assert_eq!(list.position_of(0), 0);
        assert_eq!(list.position_of(1), 0);
        assert_eq!(list.position_of(2), 1);
        assert_eq!(list.position_of(3), 1);
        assert_eq!(list.position_of(100), 2);
        assert_eq!(list.active().base_offset(), 4);
        assert_eq!(list.sealed().len(), 2);
        assert_eq!(list.earliest_offset(), 0);
    }

    #[test]
    fn prefix_replacement_keeps_tail() {
        let a = segment(0);
        let b = segment(10);
        let c = segment(20);
        let list = SegmentList::new(vec![a.clone(), b.clone(), c.clone()]).unwrap();

        assert!(list.starts_with(&[a.clone(), b.clone()]));
        assert!(!list.starts_with(&[b.clone()]));

        let replaced = list.with_prefix_replaced(2, vec![segment(0)]).unwrap();
        assert_eq!(replaced.len(), 2);
        assert!(Arc::ptr_eq(replaced.active(), &c));
        assert!(!Arc::ptr_eq(&replaced.all()[0], &a));

        let dropped = list.with_prefix_replaced(1, Vec::new()).unwrap();
        assert_eq!(dropped.earliest_offset(), 10);
    }
}
