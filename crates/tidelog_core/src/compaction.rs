//! Key-based log compaction.
//!
//! A pass works on the sealed segments of one partition in two sweeps:
//!
//! 1. Build an [`OffsetMap`] holding the latest offset of every key.
//! 2. Copy every record the [`Compactor`] keeps into fresh segment files
//!    carrying the `.cleaned` suffix.
//!
//! The output is then installed with a swap marker so that a crash at any
//! point either leaves the original segments in place or completes the swap
//! on the next open:
//!
//! ```text
//! fsync outputs -> write marker -> remove inputs, rename outputs
//!               -> swap segment list -> remove marker -> write checkpoint
//! ```
//!
//! Tombstones survive exactly one pass. The checkpoint written at the end of
//! a pass is the base offset of the first segment the pass did not touch; a
//! tombstone below the checkpoint has already been seen by a pass and is
//! dropped by the next one.

use crate::dir::sync_dir;
use crate::error::{CoreError, CoreResult};
use crate::partition::recovery::{remove_cleaned_files, write_checkpoint, SwapMarker};
use crate::partition::PartitionLog;
use crate::segment::{Record, ScanStep, Segment, SegmentFiles};
use crate::task::CancelToken;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records appended to an output segment per write.
const OUTPUT_BATCH: usize = 512;

/// Summary of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// The topic does not have compaction enabled, or nothing changed since
    /// the last pass.
    pub skipped: bool,
    /// The pass was cancelled before it changed anything.
    pub cancelled: bool,
    /// Segments read.
    pub segments_in: usize,
    /// Segments written.
    pub segments_out: usize,
    /// Records read from the input segments.
    pub records_read: u64,
    /// Records copied to the output.
    pub records_retained: u64,
    /// Keyed records dropped because a newer record has the same key.
    pub obsolete_removed: u64,
    /// Tombstones kept for one more pass.
    pub tombstones_retained: u64,
    /// Tombstones dropped after surviving a pass.
    pub tombstones_removed: u64,
    /// Total size of the input segments.
    pub bytes_before: u64,
    /// Total size of the output segments.
    pub bytes_after: u64,
}

impl CompactionReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    /// Returns true if the pass replaced any segments.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.skipped && !self.cancelled && self.segments_in > 0
    }
}

/// Latest offset of every key seen.
#[derive(Debug, Default)]
pub struct OffsetMap {
    latest: HashMap<Bytes, u64>,
}

impl OffsetMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes `record` as the latest for its key. Keyless records are ignored.
    pub fn insert(&mut self, record: &Record) {
        if let Some(key) = &record.key {
            self.latest
                .entry(key.clone())
                .and_modify(|offset| *offset = (*offset).max(record.offset))
                .or_insert(record.offset);
        }
    }

    /// Latest offset recorded for `key`.
    #[must_use]
    pub fn latest(&self, key: &[u8]) -> Option<u64> {
        self.latest.get(key).copied()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Returns true if no key has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// What a compaction pass does with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Copy the record to the output.
    Keep,
    /// Drop the record; a newer one has the same key.
    Obsolete,
    /// Drop the tombstone; it already survived a pass.
    ExpiredTombstone,
}

/// Retention rule of a compaction pass.
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    checkpoint: u64,
}

impl Compactor {
    /// Creates a compactor for a partition whose cleaner checkpoint is
    /// `checkpoint`.
    #[must_use]
    pub const fn new(checkpoint: u64) -> Self {
        Self { checkpoint }
    }

    /// Decides the fate of `record` given the latest offsets in `map`.
    #[must_use]
    pub fn decide(&self, map: &OffsetMap, record: &Record) -> Decision {
        let Some(key) = &record.key else {
            return Decision::Keep;
        };
        if map.latest(key).is_some_and(|latest| latest > record.offset) {
            return Decision::Obsolete;
        }
        if record.is_tombstone() && record.offset < self.checkpoint {
            return Decision::ExpiredTombstone;
        }
        Decision::Keep
    }

    /// Compacts an in-memory run of records in offset order.
    #[must_use]
    pub fn compact(&self, records: &[Record]) -> (Vec<Record>, CompactionReport) {
        let mut map = OffsetMap::new();
        for record in records {
            map.insert(record);
        }

        let mut report = CompactionReport::default();
        let mut kept = Vec::new();
        for record in records {
            report.records_read += 1;
            report.bytes_before += record.encoded_size() as u64;
            if self.tally(&mut report, self.decide(&map, record), record) {
                report.bytes_after += record.encoded_size() as u64;
                kept.push(record.clone());
            }
        }
        (kept, report)
    }

    /// Counts `decision` in `report` and returns true if the record is kept.
    fn tally(&self, report: &mut CompactionReport, decision: Decision, record: &Record) -> bool {
        match decision {
            Decision::Keep => {
                report.records_retained += 1;
                if record.is_tombstone() {
                    report.tombstones_retained += 1;
                }
                true
            }
            Decision::Obsolete => {
                report.obsolete_removed += 1;
                false
            }
            Decision::ExpiredTombstone => {
                report.tombstones_removed += 1;
                false
            }
        }
    }
}

/// Writes retained records into `.cleaned` segments, splitting on size.
struct OutputWriter<'a> {
    dir: &'a Path,
    max_bytes: u64,
    index_interval: u32,
    done: Vec<Segment>,
    current: Option<Segment>,
    current_bytes: u64,
    pending: Vec<Record>,
}

impl<'a> OutputWriter<'a> {
    fn new(dir: &'a Path, first_base: u64, max_bytes: u64, index_interval: u32) -> CoreResult<Self> {
        let mut writer = Self {
            dir,
            max_bytes,
            index_interval,
            done: Vec::new(),
            current: None,
            current_bytes: 0,
            pending: Vec::new(),
        };
        writer.start(first_base)?;
        Ok(writer)
    }

    fn start(&mut self, base_offset: u64) -> CoreResult<()> {
        let files = SegmentFiles::cleaned(self.dir, base_offset);
        // Left over from a pass that died before its cleanup ran.
        files.remove()?;
        self.current = Some(Segment::create_at(files, base_offset, self.index_interval)?);
        self.current_bytes = 0;
        Ok(())
    }

    fn push(&mut self, record: Record) -> CoreResult<()> {
        let size = record.encoded_size() as u64;
        let needs_split = self.current.as_ref().is_some_and(|current| {
            let relative = record.offset - current.base_offset();
            (self.current_bytes > 0 && self.current_bytes + size > self.max_bytes)
                || relative > u64::from(u32::MAX)
        });
        if needs_split {
            self.finish_current()?;
            self.start(record.offset)?;
        }

        self.current_bytes += size;
        self.pending.push(record);
        if self.pending.len() >= OUTPUT_BATCH {
            self.write_pending()?;
        }
        Ok(())
    }

    fn write_pending(&mut self) -> CoreResult<()> {
        if let Some(current) = &self.current {
            if !self.pending.is_empty() {
                current.append_batch(&self.pending)?;
                self.pending.clear();
            }
        }
        Ok(())
    }

    fn finish_current(&mut self) -> CoreResult<()> {
        self.write_pending()?;
        if let Some(current) = self.current.take() {
            current.seal()?;
            self.done.push(current);
        }
        Ok(())
    }

    /// Seals every output and returns their base offsets and total size.
    fn finish(mut self) -> CoreResult<(Vec<u64>, u64)> {
        self.finish_current()?;
        sync_dir(self.dir)?;
        let bases = self.done.iter().map(Segment::base_offset).collect();
        let bytes = self.done.iter().map(Segment::size).sum();
        Ok((bases, bytes))
    }

    /// Removes every output file written so far.
    fn discard(mut self) {
        self.pending.clear();
        for segment in self.done.drain(..).chain(self.current.take()) {
            if let Err(e) = segment.delete_files() {
                warn!(base_offset = segment.base_offset(), error = %e, "failed to remove compaction output");
            }
        }
    }
}

/// Walks every frame of `segment`, failing on anything unreadable.
fn for_each_record(
    segment: &Segment,
    mut f: impl FnMut(Record) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut scanner = segment.scan();
    let limit = segment.next_offset();
    let mut previous: Option<u64> = None;
    while let Some(step) = scanner.next_step()? {
        match step {
            ScanStep::Frame {
                position,
                header,
                record,
            } => {
                if header.offset < segment.base_offset()
                    || header.offset >= limit
                    || previous.is_some_and(|p| header.offset <= p)
                {
                    return Err(CoreError::segment_corruption(format!(
                        "segment {} position {position}: offset {} out of sequence",
                        segment.base_offset(),
                        header.offset
                    )));
                }
                previous = Some(header.offset);
                f(record?)?;
            }
            ScanStep::Torn { position } => {
                return Err(CoreError::segment_corruption(format!(
                    "segment {} frame at position {position} is incomplete",
                    segment.base_offset()
                )));
            }
            ScanStep::Invalid { error, .. } => return Err(error),
        }
    }
    Ok(())
}

fn as_compaction_failure(error: CoreError) -> CoreError {
    match error {
        CoreError::CompactionFailure { .. } => error,
        other => CoreError::compaction_failure(other.to_string()),
    }
}

/// Runs one compaction pass over `log`.
pub(crate) fn compact_partition(
    log: &PartitionLog,
    cancel: &CancelToken,
) -> CoreResult<CompactionReport> {
    let mut maintenance = log.maintenance();
    let config = log.config();
    if !config.compaction_enabled {
        return Ok(CompactionReport::skipped());
    }

    let list = log.segments();
    let inputs: Vec<Arc<Segment>> = list.sealed().to_vec();
    let Some(last_input) = inputs.last() else {
        return Ok(CompactionReport::skipped());
    };
    if maintenance.settled && last_input.base_offset() < maintenance.checkpoint {
        return Ok(CompactionReport::skipped());
    }
    let next_checkpoint = list.active().base_offset();

    let mut report = CompactionReport {
        segments_in: inputs.len(),
        bytes_before: inputs.iter().map(|s| s.size()).sum(),
        ..CompactionReport::default()
    };

    let mut map = OffsetMap::new();
    for segment in &inputs {
        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }
        for_each_record(segment, |record| {
            map.insert(&record);
            Ok(())
        })
        .map_err(as_compaction_failure)?;
    }
    debug!(
        topic = log.topic(),
        partition = %log.id(),
        keys = map.len(),
        "built compaction offset map"
    );

    let compactor = Compactor::new(maintenance.checkpoint);
    let mut output = OutputWriter::new(
        log.dir(),
        inputs[0].base_offset(),
        config.segment_max_bytes,
        config.index_interval,
    )
    .map_err(as_compaction_failure)?;

    for segment in &inputs {
        if cancel.is_cancelled() {
            output.discard();
            return Ok(report.cancelled());
        }
        let copied = for_each_record(segment, |record| {
            report.records_read += 1;
            if compactor.tally(&mut report, compactor.decide(&map, &record), &record) {
                output.push(record)?;
            }
            Ok(())
        });
        if let Err(e) = copied {
            output.discard();
            return Err(as_compaction_failure(e));
        }
    }

    let (outputs, bytes_after) = match output.finish() {
        Ok(done) => done,
        Err(e) => {
            remove_outputs(log.dir());
            return Err(as_compaction_failure(e));
        }
    };
    report.segments_out = outputs.len();
    report.bytes_after = bytes_after;

    if cancel.is_cancelled() {
        remove_outputs(log.dir());
        return Ok(report.cancelled());
    }

    let marker = SwapMarker {
        inputs: inputs.iter().map(|s| s.base_offset()).collect(),
        outputs,
    };
    if let Err(e) = marker.save(log.dir()) {
        remove_outputs(log.dir());
        return Err(as_compaction_failure(e));
    }

    if let Err(e) = install(log, &marker, &inputs, next_checkpoint) {
        log.mark_degraded(&e);
        return Err(as_compaction_failure(e));
    }
    maintenance.checkpoint = next_checkpoint;
    maintenance.settled = report.tombstones_retained == 0;

    info!(
        topic = log.topic(),
        partition = %log.id(),
        segments_in = report.segments_in,
        segments_out = report.segments_out,
        records_read = report.records_read,
        records_retained = report.records_retained,
        tombstones_removed = report.tombstones_removed,
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        "compacted partition"
    );
    Ok(report)
}

/// Completes a committed swap: files, segment list, marker, checkpoint.
fn install(
    log: &PartitionLog,
    marker: &SwapMarker,
    inputs: &[Arc<Segment>],
    checkpoint: u64,
) -> CoreResult<()> {
    let dir = log.dir();
    marker.install(dir)?;

    let interval = log.config().index_interval;
    let mut outputs = Vec::with_capacity(marker.outputs.len());
    for &base in &marker.outputs {
        outputs.push(Arc::new(Segment::open(dir, base, interval, true)?));
    }

    log.replace_segments(|list| {
        if !list.starts_with(inputs) {
            return Err(CoreError::compaction_failure(
                "segment list changed while compacting",
            ));
        }
        list.with_prefix_replaced(inputs.len(), outputs)
    })?;

    SwapMarker::clear(dir)?;
    write_checkpoint(dir, checkpoint)
}

/// Removes the `.cleaned` files of an aborted pass.
fn remove_outputs(dir: &Path) {
    if let Err(e) = remove_cleaned_files(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to remove compaction output");
    }
}
