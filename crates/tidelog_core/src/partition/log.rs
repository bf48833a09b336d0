//! The partition log: offset assignment, batching, rotation and pulls.

use crate::compaction::{self, CompactionReport};
use crate::config::TopicConfig;
use crate::dir::sync_dir;
use crate::error::{CoreError, CoreResult};
use crate::partition::batch::{AppendTicket, PendingBatch};
use crate::partition::recovery::recover_partition;
use crate::partition::{PullBatch, SegmentList};
use crate::retention::{self, RetentionReport};
use crate::segment::{frame_size, Record, Segment};
use crate::task::CancelToken;
use crate::types::{now_millis, PartitionId};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// State owned by the single logical writer.
struct WriterState {
    next_offset: u64,
    last_timestamp: i64,
    batch: PendingBatch,
    closed: bool,
}

/// Durability state that ticket holders wait on.
struct FlushState {
    degraded: Option<String>,
    closed: bool,
}

/// State shared by compaction and retention passes.
#[derive(Debug)]
pub(crate) struct Maintenance {
    /// Offset below which records have survived a compaction pass.
    pub checkpoint: u64,
    /// The last compaction pass left nothing for another pass to remove.
    pub settled: bool,
}

/// One partition of a topic.
///
/// Appends are serialised through an internal writer lock that assigns
/// offsets and admits records into a pending batch. A batch is written with
/// one backend write and becomes visible to [`PartitionLog::pull`] only once
/// it is durable. Pulls work on a snapshot of the segment list and never
/// wait for the writer.
pub struct PartitionLog {
    shared: Arc<Shared>,
    linger: Mutex<Option<JoinHandle<()>>>,
}

/// Partition state shared with the linger thread.
struct Shared {
    topic: String,
    id: PartitionId,
    dir: PathBuf,
    config: TopicConfig,
    segments: RwLock<Arc<SegmentList>>,
    writer: Mutex<WriterState>,
    writer_cv: Condvar,
    flush_state: Mutex<FlushState>,
    flush_cv: Condvar,
    high_watermark: AtomicU64,
    maintenance: Mutex<Maintenance>,
}

impl fmt::Debug for PartitionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionLog")
            .field("topic", &self.shared.topic)
            .field("id", &self.shared.id)
            .field("dir", &self.shared.dir)
            .field("high_watermark", &self.high_watermark())
            .finish_non_exhaustive()
    }
}

impl PartitionLog {
    /// Opens the partition stored in `dir`, recovering it if needed, and
    /// starts its linger flusher.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, recovery fails, or
    /// the flusher thread cannot be spawned.
    pub fn open(
        topic: impl Into<String>,
        id: PartitionId,
        dir: &Path,
        config: TopicConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let topic = topic.into();
        let recovered = recover_partition(dir, config.index_interval)?;
        let list = SegmentList::new(recovered.segments)?;

        let next_offset = list.active().next_offset();
        let last_timestamp = list
            .all()
            .iter()
            .map(|s| s.max_timestamp())
            .max()
            .unwrap_or(i64::MIN);

        debug!(
            topic = %topic,
            partition = %id,
            segments = list.len(),
            next_offset,
            "opened partition"
        );

        let shared = Arc::new(Shared {
            topic,
            id,
            dir: dir.to_path_buf(),
            config,
            segments: RwLock::new(Arc::new(list)),
            writer: Mutex::new(WriterState {
                next_offset,
                last_timestamp,
                batch: PendingBatch::default(),
                closed: false,
            }),
            writer_cv: Condvar::new(),
            flush_state: Mutex::new(FlushState {
                degraded: None,
                closed: false,
            }),
            flush_cv: Condvar::new(),
            high_watermark: AtomicU64::new(next_offset),
            maintenance: Mutex::new(Maintenance {
                checkpoint: recovered.checkpoint,
                settled: false,
            }),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("tidelog-linger-{}-{}", shared.topic, id.as_u32()))
            .spawn(move || while thread_shared.linger_step() {})?;

        Ok(Self {
            shared,
            linger: Mutex::new(Some(handle)),
        })
    }

    /// Topic this partition belongs to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Partition id.
    #[must_use]
    pub fn id(&self) -> PartitionId {
        self.shared.id
    }

    /// Directory holding the partition's files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Topic configuration.
    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.shared.config
    }

    /// One past the latest durable offset.
    #[must_use]
    pub fn high_watermark(&self) -> u64 {
        self.shared.high_watermark()
    }

    /// Earliest offset still retained.
    #[must_use]
    pub fn earliest_offset(&self) -> u64 {
        self.shared.segments.read().earliest_offset()
    }

    /// Current segment list.
    #[must_use]
    pub fn segments(&self) -> Arc<SegmentList> {
        self.shared.snapshot()
    }

    /// Base offsets of the current segments, oldest first.
    #[must_use]
    pub fn segment_base_offsets(&self) -> Vec<u64> {
        self.segments().all().iter().map(|s| s.base_offset()).collect()
    }

    /// Why the partition stopped accepting appends, if it did.
    #[must_use]
    pub fn degraded_reason(&self) -> Option<String> {
        self.shared.flush_state.lock().degraded.clone()
    }

    /// Assigns the next offset to a record and admits it to the pending batch.
    ///
    /// The returned ticket reports when the record is durable. The batch is
    /// flushed when it reaches `batch_max_records`, when `batch_linger` has
    /// passed since its first record, or when someone forces a flush.
    ///
    /// # Errors
    ///
    /// - `PartitionClosed` / `PartitionDegraded` if appends are not accepted
    /// - `SegmentRotationFailure` if a full segment could not be rolled; no
    ///   offset was assigned and the call can be retried
    /// - `InvalidOperation` if the record cannot be framed
    /// - The write error if admitting the record filled the batch and the
    ///   flush failed
    pub fn enqueue(&self, key: Option<Bytes>, value: Bytes) -> CoreResult<AppendTicket<'_>> {
        let offset = self.shared.enqueue(key, value)?;
        Ok(AppendTicket::new(self, offset))
    }

    /// Appends a record and blocks until it is durable.
    ///
    /// # Errors
    ///
    /// See [`PartitionLog::enqueue`] and [`AppendTicket::wait`].
    pub fn append(&self, key: Option<Bytes>, value: Bytes) -> CoreResult<u64> {
        self.enqueue(key, value)?.wait()
    }

    /// Appends a record and flushes its batch immediately.
    ///
    /// # Errors
    ///
    /// See [`PartitionLog::enqueue`] and [`AppendTicket::flush`].
    pub fn append_sync(&self, key: Option<Bytes>, value: Bytes) -> CoreResult<u64> {
        self.enqueue(key, value)?.flush()
    }

    /// Appends a delete marker for `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `key` is empty, otherwise the errors of
    /// [`PartitionLog::append`].
    pub fn append_tombstone(&self, key: Bytes) -> CoreResult<u64> {
        if key.is_empty() {
            return Err(CoreError::invalid_operation("a tombstone needs a key"));
        }
        self.append(Some(key), Bytes::new())
    }

    /// Writes the pending batch, if any, and waits for it to be durable.
    ///
    /// # Errors
    ///
    /// Returns the write error, or `PartitionDegraded` if an earlier write
    /// failed.
    pub fn flush(&self) -> CoreResult<()> {
        let mut writer = self.shared.writer.lock();
        if writer.batch.is_empty() {
            return self.shared.check_degraded();
        }
        self.shared.flush_locked(&mut writer)
    }

    /// Reads up to `max_records` entries starting at offset `from`.
    ///
    /// Only durable records are returned. Reading crosses segment
    /// boundaries; gaps left by compaction are skipped.
    ///
    /// # Errors
    ///
    /// - `OffsetOutOfRange` if `from` is below the earliest retained offset
    ///   or above the high watermark
    /// - Storage errors if a segment cannot be read; the partition is then
    ///   marked degraded and stops accepting appends, while pulls go on
    pub fn pull(&self, from: u64, max_records: usize) -> CoreResult<PullBatch> {
        let high_watermark = self.high_watermark();
        let list = self.segments();
        let earliest = list.earliest_offset();

        if from < earliest || from > high_watermark {
            return Err(CoreError::OffsetOutOfRange {
                requested: from,
                earliest,
                high_watermark,
            });
        }

        let mut entries = Vec::new();
        let mut cursor = from;
        let segments = list.all();
        let mut index = list.position_of(from);

        while entries.len() < max_records && cursor < high_watermark && index < segments.len() {
            let segment = &segments[index];
            let until = segments
                .get(index + 1)
                .map_or(high_watermark, |next| next.base_offset().min(high_watermark));
            let before = entries.len();
            let remaining = max_records - entries.len();

            let resume = segment
                .read_from(cursor, until, remaining, &mut entries)
                .inspect_err(|e| {
                    if matches!(e, CoreError::Storage(_) | CoreError::Io(_)) {
                        self.shared.mark_degraded(e);
                    }
                })?;
            if let Some(resume) = resume {
                cursor = resume;
            }

            let lost_framing = entries.len() > before
                && matches!(entries.last(), Some(Err(CoreError::SegmentCorruption { .. })));
            if !lost_framing && entries.len() >= max_records {
                break;
            }
            cursor = cursor.max(until);
            index += 1;
        }

        Ok(PullBatch {
            entries,
            next_offset: cursor,
        })
    }

    /// Runs one compaction pass over the sealed segments.
    ///
    /// # Errors
    ///
    /// Returns `CompactionFailure` if the pass aborted. The original
    /// segments remain authoritative.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        self.compact_with(&CancelToken::new())
    }

    /// Like [`PartitionLog::compact`] but stops early once `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`PartitionLog::compact`].
    pub fn compact_with(&self, cancel: &CancelToken) -> CoreResult<CompactionReport> {
        compaction::compact_partition(self, cancel)
    }

    /// Deletes sealed segments that violate the retention policy.
    ///
    /// `now_ms` is the current time in milliseconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment's files cannot be removed.
    pub fn apply_retention(&self, now_ms: i64) -> CoreResult<RetentionReport> {
        retention::apply_retention(self, now_ms)
    }

    /// Flushes pending records and stops accepting appends.
    ///
    /// Pulls keep working on a closed partition.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush.
    pub fn close(&self) -> CoreResult<()> {
        let result = self.shared.shutdown();
        let handle = self.linger.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(topic = %self.shared.topic, partition = %self.shared.id, "linger thread panicked");
            }
        }
        result
    }

    /// Blocks until `offset` is durable, the deadline passes, or the
    /// partition fails.
    ///
    /// Returns `Ok(false)` on timeout.
    pub(crate) fn wait_durable(&self, offset: u64, deadline: Option<Instant>) -> CoreResult<bool> {
        self.shared.wait_durable(offset, deadline)
    }

    /// Replaces the segment list with the one `f` derives from it.
    pub(crate) fn replace_segments<F>(&self, f: F) -> CoreResult<Arc<SegmentList>>
    where
        F: FnOnce(&SegmentList) -> CoreResult<SegmentList>,
    {
        self.shared.replace_segments(f)
    }

    /// Serialises compaction and retention passes.
    pub(crate) fn maintenance(&self) -> MutexGuard<'_, Maintenance> {
        self.shared.maintenance.lock()
    }

    pub(crate) fn mark_degraded(&self, error: &CoreError) {
        self.shared.mark_degraded(error);
    }
}

impl Drop for PartitionLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(topic = %self.shared.topic, partition = %self.shared.id, error = %e, "flush on drop failed");
        }
    }
}

impl Shared {
    fn high_watermark(&self) -> u64 {
        self.high_watermark.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Arc<SegmentList> {
        Arc::clone(&self.segments.read())
    }

    fn enqueue(&self, key: Option<Bytes>, value: Bytes) -> CoreResult<u64> {
        let key = key.filter(|k| !k.is_empty());
        let size = frame_size(key.as_ref().map_or(0, Bytes::len), value.len());
        if u32::try_from(size).is_err() {
            return Err(CoreError::invalid_operation(format!(
                "record of {size} bytes does not fit in a frame"
            )));
        }
        let size = size as u64;

        let mut writer = self.writer.lock();
        if writer.closed {
            return Err(CoreError::PartitionClosed);
        }
        self.check_degraded()?;
        self.roll_if_needed(&mut writer, size)?;

        let offset = writer.next_offset;
        let timestamp = now_millis().max(writer.last_timestamp);
        writer.next_offset += 1;
        writer.last_timestamp = timestamp;
        writer.batch.push(Record::new(offset, timestamp, key, value), size);
        if writer.batch.len() == 1 {
            self.writer_cv.notify_one();
        }

        if writer.batch.len() >= self.config.batch_max_records {
            self.flush_locked(&mut writer)?;
        }
        Ok(offset)
    }

    fn shutdown(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        if writer.closed {
            return Ok(());
        }
        let result = if writer.batch.is_empty() {
            Ok(())
        } else {
            self.flush_locked(&mut writer)
        };
        writer.closed = true;
        self.writer_cv.notify_all();

        let mut state = self.flush_state.lock();
        state.closed = true;
        self.flush_cv.notify_all();
        result
    }

    fn wait_durable(&self, offset: u64, deadline: Option<Instant>) -> CoreResult<bool> {
        let mut state = self.flush_state.lock();
        loop {
            if self.high_watermark() > offset {
                return Ok(true);
            }
            if let Some(reason) = &state.degraded {
                return Err(self.degraded_error(reason));
            }
            if state.closed {
                return Err(CoreError::PartitionClosed);
            }
            match deadline {
                Some(deadline) => {
                    if self.flush_cv.wait_until(&mut state, deadline).timed_out() {
                        return Ok(self.high_watermark() > offset);
                    }
                }
                None => self.flush_cv.wait(&mut state),
            }
        }
    }

    fn replace_segments<F>(&self, f: F) -> CoreResult<Arc<SegmentList>>
    where
        F: FnOnce(&SegmentList) -> CoreResult<SegmentList>,
    {
        let mut guard = self.segments.write();
        let next = Arc::new(f(&guard)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }

    fn mark_degraded(&self, error: &CoreError) {
        let mut state = self.flush_state.lock();
        if state.degraded.is_none() {
            warn!(
                topic = %self.topic,
                partition = %self.id,
                error = %error,
                "partition degraded"
            );
            state.degraded = Some(error.to_string());
        }
        self.flush_cv.notify_all();
    }

    fn check_degraded(&self) -> CoreResult<()> {
        match &self.flush_state.lock().degraded {
            Some(reason) => Err(self.degraded_error(reason)),
            None => Ok(()),
        }
    }

    fn degraded_error(&self, reason: &str) -> CoreError {
        CoreError::PartitionDegraded {
            topic: self.topic.clone(),
            partition: self.id.as_u32(),
            reason: reason.to_string(),
        }
    }

    /// Rolls the active segment if it cannot take a record of `incoming` bytes.
    fn roll_if_needed(&self, writer: &mut WriterState, incoming: u64) -> CoreResult<()> {
        let active = Arc::clone(self.segments.read().active());
        let records = active.record_count() + writer.batch.len() as u64;
        let bytes = active.size() + writer.batch.bytes();
        let full = active.is_sealed()
            || records >= self.config.segment_max_records
            || (records > 0 && bytes + incoming > self.config.segment_max_bytes)
            || writer.next_offset - active.base_offset() > u64::from(u32::MAX);
        if !full {
            return Ok(());
        }

        if !writer.batch.is_empty() {
            self.flush_locked(writer)?;
        }
        self.roll(&active, writer.next_offset)
    }

    /// Seals `active` and installs a new active segment at `base_offset`.
    fn roll(&self, active: &Arc<Segment>, base_offset: u64) -> CoreResult<()> {
        active
            .seal()
            .map_err(|e| CoreError::rotation_failure(base_offset, e))?;

        let segment = Segment::create(&self.dir, base_offset, self.config.index_interval)
            .map_err(|e| CoreError::rotation_failure(base_offset, e))?;
        if let Err(e) = sync_dir(&self.dir) {
            let _ = segment.delete_files();
            return Err(CoreError::rotation_failure(base_offset, e));
        }

        let segment = Arc::new(segment);
        self.replace_segments(|list| {
            let mut segments = list.all().to_vec();
            segments.push(Arc::clone(&segment));
            SegmentList::new(segments)
        })
        .map_err(|e| CoreError::rotation_failure(base_offset, e))?;

        info!(
            topic = %self.topic,
            partition = %self.id,
            sealed_base = active.base_offset(),
            sealed_records = active.record_count(),
            sealed_bytes = active.size(),
            base_offset,
            "rolled segment"
        );
        Ok(())
    }

    /// Writes the pending batch to the active segment and publishes it.
    fn flush_locked(&self, writer: &mut WriterState) -> CoreResult<()> {
        let records = writer.batch.take();
        let Some(last) = records.last() else {
            return Ok(());
        };
        self.check_degraded()?;
        let next = last.offset + 1;
        let active = Arc::clone(self.segments.read().active());

        let result = active
            .append_batch(&records)
            .and_then(|_| active.flush(self.config.sync_on_flush));
        if let Err(e) = result {
            self.mark_degraded(&e);
            return Err(e);
        }

        let state = self.flush_state.lock();
        self.high_watermark.store(next, Ordering::Release);
        self.flush_cv.notify_all();
        drop(state);

        debug!(
            topic = %self.topic,
            partition = %self.id,
            records = records.len(),
            high_watermark = next,
            "flushed batch"
        );
        Ok(())
    }

    /// One iteration of the linger flusher. Returns false once closed.
    fn linger_step(&self) -> bool {
        let mut writer = self.writer.lock();
        if writer.closed {
            return false;
        }
        match writer.batch.started() {
            None => {
                self.writer_cv.wait(&mut writer);
            }
            Some(started) => {
                let deadline = started + self.config.batch_linger;
                if Instant::now() < deadline {
                    self.writer_cv.wait_until(&mut writer, deadline);
                } else if self.flush_locked(&mut writer).is_err() {
                    // Waiters learn about the failure through the degraded flag.
                    return false;
                }
            }
        }
        !writer.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentFiles;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn open(config: TopicConfig) -> (TempDir, PartitionLog) {
        let dir = tempdir().unwrap();
        let log = PartitionLog::open("events", PartitionId::new(0), dir.path(), config).unwrap();
        (dir, log)
    }

    fn value(i: u64) -> Bytes {
        Bytes::from(format!("value-{i}"))
    }

    #[test]
    fn offsets_start_at_zero_and_increase() {
        let (_dir, log) = open(TopicConfig::default());
        for i in 0..10 {
            assert_eq!(log.append(None, value(i)).unwrap(), i);
        }
        assert_eq!(log.high_watermark(), 10);
        assert_eq!(log.earliest_offset(), 0);
    }

    #[test]
    fn enqueued_records_are_invisible_until_flushed() {
        let config = TopicConfig::default().batch_linger(Duration::from_secs(60));
        let (_dir, log) = open(config);

        let ticket = log.enqueue(None, value(0)).unwrap();
        assert_eq!(ticket.offset(), 0);
        assert!(!ticket.is_durable());
        assert_eq!(log.high_watermark(), 0);
        assert!(log.pull(0, 10).unwrap().is_empty());
        assert_eq!(ticket.wait_timeout(Duration::from_millis(10)).unwrap(), None);

        assert_eq!(ticket.flush().unwrap(), 0);
        assert_eq!(log.high_watermark(), 1);
        assert_eq!(log.pull(0, 10).unwrap().len(), 1);
    }

    #[test]
    fn linger_flushes_pending_batch() {
        let config = TopicConfig::default().batch_linger(Duration::from_millis(20));
        let (_dir, log) = open(config);

        let ticket = log.enqueue(None, value(0)).unwrap();
        let offset = ticket.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(offset, Some(0));
    }

    #[test]
    fn full_batch_flushes_without_linger() {
        let config = TopicConfig::default()
            .batch_max_records(4)
            .batch_linger(Duration::from_secs(60));
        let (_dir, log) = open(config);

        let tickets: Vec<_> = (0..4).map(|i| log.enqueue(None, value(i)).unwrap()).collect();
        assert!(tickets.iter().all(AppendTicket::is_durable));
        assert_eq!(log.high_watermark(), 4);
    }

    #[test]
    fn timestamps_do_not_decrease() {
        let (_dir, log) = open(TopicConfig::default());
        for i in 0..20 {
            log.append_sync(None, value(i)).unwrap();
        }
        let batch = log.pull(0, 20).unwrap();
        let stamps: Vec<_> = batch.records().map(|r| r.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rotation_by_record_count() {
        let config = TopicConfig::default().segment_max_records(2);
        let (_dir, log) = open(config);
        for i in 0..5 {
            log.append(None, value(i)).unwrap();
        }

        assert_eq!(log.segment_base_offsets(), vec![0, 2, 4]);
        let list = log.segments();
        assert!(list.sealed().iter().all(|s| s.is_sealed()));
        assert!(!list.active().is_sealed());

        let batch = log.pull(1, 3).unwrap();
        let offsets: Vec<_> = batch.records().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 2, 3]);
        assert_eq!(batch.next_offset, 4);
    }

    #[test]
    fn rotation_by_size() {
        let record_size = frame_size(0, 7) as u64;
        let config = TopicConfig::default().segment_max_bytes(record_size * 3);
        let (_dir, log) = open(config);
        for i in 0..7 {
            log.append(None, value(i)).unwrap();
        }
        assert_eq!(log.segment_base_offsets(), vec![0, 3, 6]);
        assert!(log
            .segments()
            .all()
            .iter()
            .all(|s| s.size() <= record_size * 3));
    }

    #[test]
    fn oversized_record_gets_own_segment() {
        let config = TopicConfig::default().segment_max_bytes(64);
        let (_dir, log) = open(config);
        log.append(None, Bytes::from(vec![1u8; 200])).unwrap();
        log.append(None, Bytes::from(vec![2u8; 200])).unwrap();
        assert_eq!(log.segment_base_offsets(), vec![0, 1]);
    }

    #[test]
    fn pull_bounds() {
        let (_dir, log) = open(TopicConfig::default());
        for i in 0..3 {
            log.append(None, value(i)).unwrap();
        }

        let at_end = log.pull(3, 10).unwrap();
        assert!(at_end.is_empty());
        assert_eq!(at_end.next_offset, 3);

        let err = log.pull(4, 10).unwrap_err();
        assert!(matches!(
            err,
            CoreError::OffsetOutOfRange {
                requested: 4,
                earliest: 0,
                high_watermark: 3
            }
        ));

        let none = log.pull(1, 0).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.next_offset, 1);
    }

    #[test]
    fn pull_resumes_where_it_stopped() {
        let config = TopicConfig::default().segment_max_records(3);
        let (_dir, log) = open(config);
        for i in 0..10 {
            log.append(Some(Bytes::from(format!("k{i}"))), value(i)).unwrap();
        }

        let mut from = 0;
        let mut seen = Vec::new();
        while from < log.high_watermark() {
            let batch = log.pull(from, 4).unwrap();
            seen.extend(batch.records().map(|r| r.offset));
            from = batch.next_offset;
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn tombstone_requires_key() {
        let (_dir, log) = open(TopicConfig::default());
        assert!(log.append_tombstone(Bytes::new()).is_err());
        let offset = log.append_tombstone(Bytes::from_static(b"user-1")).unwrap();
        let batch = log.pull(offset, 1).unwrap();
        assert!(batch.records().next().unwrap().is_tombstone());
    }

    #[test]
    fn empty_key_is_keyless() {
        let (_dir, log) = open(TopicConfig::default());
        log.append(Some(Bytes::new()), value(0)).unwrap();
        let batch = log.pull(0, 1).unwrap();
        assert_eq!(batch.records().next().unwrap().key, None);
    }

    #[test]
    fn reopen_continues_offsets() {
        let dir = tempdir().unwrap();
        let config = TopicConfig::default().segment_max_records(4);
        {
            let log =
                PartitionLog::open("events", PartitionId::new(0), dir.path(), config.clone())
                    .unwrap();
            for i in 0..6 {
                log.append(None, value(i)).unwrap();
            }
            log.close().unwrap();
        }

        let log = PartitionLog::open("events", PartitionId::new(0), dir.path(), config).unwrap();
        assert_eq!(log.high_watermark(), 6);
        assert_eq!(log.segment_base_offsets(), vec![0, 4]);
        assert_eq!(log.append(None, value(6)).unwrap(), 6);

        let batch = log.pull(0, 100).unwrap();
        let values: Vec<_> = batch.records().map(|r| r.value.clone()).collect();
        assert_eq!(values, (0..7).map(value).collect::<Vec<_>>());
    }

    #[test]
    fn drop_flushes_pending_batch() {
        let dir = tempdir().unwrap();
        let config = TopicConfig::default().batch_linger(Duration::from_secs(60));
        {
            let log =
                PartitionLog::open("events", PartitionId::new(0), dir.path(), config.clone())
                    .unwrap();
            let _ = log.enqueue(None, value(0)).unwrap();
        }
        let log = PartitionLog::open("events", PartitionId::new(0), dir.path(), config).unwrap();
        assert_eq!(log.high_watermark(), 1);
    }

    #[test]
    fn closed_partition_rejects_appends_but_serves_pulls() {
        let (_dir, log) = open(TopicConfig::default());
        log.append(None, value(0)).unwrap();
        log.close().unwrap();

        assert!(matches!(
            log.append(None, value(1)),
            Err(CoreError::PartitionClosed)
        ));
        assert_eq!(log.pull(0, 10).unwrap().len(), 1);
        log.close().unwrap();
    }

    #[test]
    fn rotation_failure_assigns_no_offset() {
        let config = TopicConfig::default().segment_max_records(2);
        let (dir, log) = open(config);
        log.append(None, value(0)).unwrap();
        log.append(None, value(1)).unwrap();

        let blocked = SegmentFiles::new(dir.path(), 2);
        fs::create_dir(&blocked.log).unwrap();

        let err = log.append(None, value(2)).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            CoreError::SegmentRotationFailure { base_offset: 2, .. }
        ));
        assert_eq!(log.high_watermark(), 2);
        assert!(log.degraded_reason().is_none());

        fs::remove_dir(&blocked.log).unwrap();
        assert_eq!(log.append(None, value(2)).unwrap(), 2);
        assert_eq!(log.segment_base_offsets(), vec![0, 2]);
    }

    #[test]
    fn concurrent_appends_are_gapless() {
        let config = TopicConfig::default().batch_max_records(8);
        let (_dir, log) = open(config);

        let mut offsets: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let log = &log;
                    scope.spawn(move || {
                        (0..50)
                            .map(|i| log.append(None, value(t * 100 + i)).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        offsets.sort_unstable();
        assert_eq!(offsets, (0..200).collect::<Vec<_>>());
        assert_eq!(log.high_watermark(), 200);
    }
}
