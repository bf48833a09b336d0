//! Segment retention by age and size.

use crate::config::TopicConfig;
use crate::dir::sync_dir;
use crate::error::{CoreError, CoreResult};
use crate::partition::PartitionLog;
use crate::segment::Segment;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Summary of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Base offsets of the deleted segments, oldest first.
    pub deleted: Vec<u64>,
    /// Bytes freed.
    pub bytes_reclaimed: u64,
}

impl RetentionReport {
    /// Returns true if nothing was deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}

/// Age and size limits of a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Delete segments whose newest record is older than this.
    pub max_age: Option<Duration>,
    /// Delete the oldest segments while the partition is larger than this.
    pub max_bytes: Option<u64>,
}

impl RetentionPolicy {
    /// Extracts the retention limits of a topic.
    #[must_use]
    pub fn from_config(config: &TopicConfig) -> Self {
        Self {
            max_age: config.retention_max_age,
            max_bytes: config.retention_max_bytes,
        }
    }

    /// Returns true if any limit is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_bytes.is_some()
    }

    /// Number of leading `sealed` segments to delete.
    ///
    /// `total_bytes` is the size of the whole partition, active segment
    /// included. Empty segments have no newest record and count as expired
    /// under an age limit.
    #[must_use]
    pub fn expired_prefix(&self, sealed: &[Arc<Segment>], total_bytes: u64, now_ms: i64) -> usize {
        let cutoff = self.max_age.map(|age| {
            let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
            now_ms.saturating_sub(age_ms)
        });

        let mut remaining = total_bytes;
        let mut count = 0;
        for segment in sealed {
            let too_old = cutoff.is_some_and(|cutoff| segment.max_timestamp() < cutoff);
            let too_big = self.max_bytes.is_some_and(|max| remaining > max);
            if !too_old && !too_big {
                break;
            }
            remaining = remaining.saturating_sub(segment.size());
            count += 1;
        }
        count
    }
}

/// Deletes the sealed segments of `log` that violate its retention policy.
pub(crate) fn apply_retention(log: &PartitionLog, now_ms: i64) -> CoreResult<RetentionReport> {
    let _maintenance = log.maintenance();
    let policy = RetentionPolicy::from_config(log.config());
    if !policy.is_enabled() {
        return Ok(RetentionReport::default());
    }

    let list = log.segments();
    let count = policy.expired_prefix(list.sealed(), list.total_bytes(), now_ms);
    if count == 0 {
        return Ok(RetentionReport::default());
    }
    let doomed: Vec<Arc<Segment>> = list.sealed()[..count].to_vec();

    log.replace_segments(|current| {
        if !current.starts_with(&doomed) {
            return Err(CoreError::invalid_operation(
                "segment list changed during retention",
            ));
        }
        current.with_prefix_replaced(doomed.len(), Vec::new())
    })?;

    // Pulls that already hold a removed segment keep reading from its open
    // file handles.
    let mut report = RetentionReport::default();
    let mut first_error = None;
    for segment in &doomed {
        report.deleted.push(segment.base_offset());
        report.bytes_reclaimed += segment.size();
        if let Err(e) = segment.delete_files() {
            warn!(
                topic = log.topic(),
                partition = %log.id(),
                base_offset = segment.base_offset(),
                error = %e,
                "failed to delete expired segment"
            );
            first_error.get_or_insert(e);
        }
    }
    sync_dir(log.dir())?;

    info!(
        topic = log.topic(),
        partition = %log.id(),
        segments = report.deleted.len(),
        bytes = report.bytes_reclaimed,
        earliest_offset = log.earliest_offset(),
        "deleted expired segments"
    );

    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Record;
    use bytes::Bytes;
    use tidelog_storage::InMemoryBackend;

    /// An in-memory sealed segment holding one record per timestamp.
    fn segment(base: u64, timestamps: &[i64]) -> Arc<Segment> {
        let segment = Segment::from_backends(
            base,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            4,
            false,
        )
        .unwrap();
        let records: Vec<_> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| Record::new(base + i as u64, ts, None, Bytes::from_static(b"0123456789")))
            .collect();
        if !records.is_empty() {
            segment.append_batch(&records).unwrap();
        }
        segment.seal().unwrap();
        Arc::new(segment)
    }

    fn total(segments: &[Arc<Segment>]) -> u64 {
        segments.iter().map(|s| s.size()).sum()
    }

    #[test]
    fn disabled_policy_deletes_nothing() {
        let segments = vec![segment(0, &[0]), segment(1, &[0])];
        let policy = RetentionPolicy::default();
        assert!(!policy.is_enabled());
        assert_eq!(policy.expired_prefix(&segments, u64::MAX, i64::MAX), 0);
    }

    #[test]
    fn age_limit_takes_old_prefix() {
        let segments = vec![
            segment(0, &[1_000, 2_000]),
            segment(2, &[3_000]),
            segment(3, &[9_000]),
        ];
        let policy = RetentionPolicy {
            max_age: Some(Duration::from_secs(5)),
            max_bytes: None,
        };
        // Cutoff is 10_000 - 5_000 = 5_000.
        assert_eq!(policy.expired_prefix(&segments, total(&segments), 10_000), 2);
        assert_eq!(policy.expired_prefix(&segments, total(&segments), 4_000), 0);
    }

    #[test]
    fn age_limit_stops_at_first_young_segment() {
        let segments = vec![segment(0, &[9_000]), segment(1, &[1_000])];
        let policy = RetentionPolicy {
            max_age: Some(Duration::from_secs(5)),
            max_bytes: None,
        };
        assert_eq!(policy.expired_prefix(&segments, total(&segments), 10_000), 0);
    }

    #[test]
    fn size_limit_deletes_until_under() {
        let segments = vec![segment(0, &[0]), segment(1, &[0]), segment(2, &[0])];
        let one = segments[0].size();
        let policy = RetentionPolicy {
            max_age: None,
            max_bytes: Some(one * 2),
        };
        // Active segment adds one more segment's worth of bytes.
        assert_eq!(policy.expired_prefix(&segments, one * 4, 0), 2);
        assert_eq!(policy.expired_prefix(&segments, one * 2, 0), 0);
    }

    #[test]
    fn empty_segments_count_as_expired_by_age() {
        let segments = vec![segment(0, &[]), segment(1, &[10_000])];
        let policy = RetentionPolicy {
            max_age: Some(Duration::from_secs(1)),
            max_bytes: None,
        };
        assert_eq!(policy.expired_prefix(&segments, total(&segments), 10_500), 1);
    }
}
