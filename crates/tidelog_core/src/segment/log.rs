//! A single segment: one data file plus its sparse index.

use crate::error::{CoreError, CoreResult};
use crate::segment::index::{IndexEntry, OffsetIndex};
use crate::segment::iter::{FrameScanner, ScanStep};
use crate::segment::record::Record;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tidelog_storage::{FileBackend, StorageBackend};
use tracing::{info, warn};

/// Data file extension.
pub const LOG_EXTENSION: &str = "log";
/// Index file extension.
pub const INDEX_EXTENSION: &str = "index";
/// Suffix appended to compaction output files until they are installed.
pub const CLEANED_SUFFIX: &str = ".cleaned";

/// Paths of a segment's two files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFiles {
    /// Data file.
    pub log: PathBuf,
    /// Index file.
    pub index: PathBuf,
}

impl SegmentFiles {
    /// Returns the live file names for `base_offset` in `dir`.
    #[must_use]
    pub fn new(dir: &Path, base_offset: u64) -> Self {
        Self {
            log: dir.join(format!("{base_offset:020}.{LOG_EXTENSION}")),
            index: dir.join(format!("{base_offset:020}.{INDEX_EXTENSION}")),
        }
    }

    /// Returns the compaction output names for `base_offset` in `dir`.
    #[must_use]
    pub fn cleaned(dir: &Path, base_offset: u64) -> Self {
        Self {
            log: dir.join(format!("{base_offset:020}.{LOG_EXTENSION}{CLEANED_SUFFIX}")),
            index: dir.join(format!(
                "{base_offset:020}.{INDEX_EXTENSION}{CLEANED_SUFFIX}"
            )),
        }
    }

    /// Removes both files, ignoring files that are already gone.
    pub fn remove(&self) -> io::Result<()> {
        for path in [&self.log, &self.index] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Parses a base offset out of a `<base:020>.log` file name.
#[must_use]
pub fn parse_base_offset(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(LOG_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Mutable state owned by the single writer.
#[derive(Debug)]
struct WriteState {
    /// Bytes handed to the backend, published or not.
    written: u64,
    /// Records handed to the backend, published or not.
    records_written: u64,
    next_offset: u64,
    max_timestamp: i64,
    /// Index entries for written but unpublished frames.
    pending_index: Vec<IndexEntry>,
}

/// Outcome of walking a data file at open.
#[derive(Debug, Default)]
struct Recovered {
    records: u64,
    next_offset: Option<u64>,
    max_timestamp: i64,
    entries: Vec<IndexEntry>,
    /// Position of the first torn or unparseable frame.
    broken_at: Option<u64>,
}

/// One bounded range of a partition's offset space.
///
/// A segment is either active (appendable) or sealed (immutable). Appended
/// frames become visible to readers only after [`Segment::flush`] publishes
/// them: the durable size is advanced first and index entries for the new
/// frames afterwards, so readers never see a partial frame.
pub struct Segment {
    base_offset: u64,
    data: Box<dyn StorageBackend>,
    index_store: Box<dyn StorageBackend>,
    index: OffsetIndex,
    index_interval: u32,
    files: Option<SegmentFiles>,
    sealed: AtomicBool,
    durable_size: AtomicU64,
    record_count: AtomicU64,
    next_offset: AtomicU64,
    max_timestamp: AtomicI64,
    writer: Mutex<WriteState>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("base_offset", &self.base_offset)
            .field("sealed", &self.is_sealed())
            .field("size", &self.size())
            .field("record_count", &self.record_count())
            .field("next_offset", &self.next_offset())
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Creates a new, empty active segment in `dir`.
    ///
    /// Fails if either file already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created.
    pub fn create(dir: &Path, base_offset: u64, index_interval: u32) -> CoreResult<Self> {
        Self::create_at(SegmentFiles::new(dir, base_offset), base_offset, index_interval)
    }

    /// Creates a new, empty active segment at explicit paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created.
    pub fn create_at(files: SegmentFiles, base_offset: u64, index_interval: u32) -> CoreResult<Self> {
        let data = FileBackend::create_new(&files.log)?;
        let index = match FileBackend::create_new(&files.index) {
            Ok(index) => index,
            Err(e) => {
                let _ = fs::remove_file(&files.log);
                return Err(e.into());
            }
        };
        let mut segment =
            Self::from_backends(base_offset, Box::new(data), Box::new(index), index_interval, false)?;
        segment.files = Some(files);
        Ok(segment)
    }

    /// Opens an existing segment from `dir`, recovering its state by walking
    /// every frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be opened or read.
    pub fn open(dir: &Path, base_offset: u64, index_interval: u32, sealed: bool) -> CoreResult<Self> {
        let files = SegmentFiles::new(dir, base_offset);
        let data = FileBackend::open(&files.log)?;
        let index = FileBackend::open(&files.index)?;
        let mut segment =
            Self::from_backends(base_offset, Box::new(data), Box::new(index), index_interval, sealed)?;
        segment.files = Some(files);
        Ok(segment)
    }

    /// Builds a segment over arbitrary backends.
    ///
    /// The data backend is walked frame by frame. For an active segment a
    /// torn or unparseable tail is truncated away. For a sealed segment the
    /// bytes are left alone, and the index backend is reused if it is valid
    /// or rewritten from the walk otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend operation fails.
    pub fn from_backends(
        base_offset: u64,
        data: Box<dyn StorageBackend>,
        index_store: Box<dyn StorageBackend>,
        index_interval: u32,
        sealed: bool,
    ) -> CoreResult<Self> {
        let interval = u64::from(index_interval.max(1));
        let recovered = recover(data.as_ref(), base_offset, interval, sealed)?;

        let mut size = data.size()?;
        if let Some(position) = recovered.broken_at {
            if sealed {
                warn!(
                    base_offset,
                    position, "sealed segment has unreadable frames past this position"
                );
            } else {
                info!(
                    base_offset,
                    position,
                    dropped = size - position,
                    "truncating torn tail of active segment"
                );
                data.truncate(position)?;
                size = position;
            }
        }

        let entries = if sealed {
            load_or_rebuild_index(index_store.as_ref(), size, recovered.entries, base_offset)?
        } else {
            recovered.entries
        };

        let next_offset = recovered.next_offset.unwrap_or(base_offset);
        Ok(Self {
            base_offset,
            data,
            index_store,
            index: OffsetIndex::from_entries(entries),
            index_interval: index_interval.max(1),
            files: None,
            sealed: AtomicBool::new(sealed),
            durable_size: AtomicU64::new(size),
            record_count: AtomicU64::new(recovered.records),
            next_offset: AtomicU64::new(next_offset),
            max_timestamp: AtomicI64::new(recovered.max_timestamp),
            writer: Mutex::new(WriteState {
                written: size,
                records_written: recovered.records,
                next_offset,
                max_timestamp: recovered.max_timestamp,
                pending_index: Vec::new(),
            }),
        })
    }

    /// Offset of the first record this segment may hold.
    #[must_use]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// One past the highest published offset, or the base offset if empty.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }

    /// Number of published records.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Acquire)
    }

    /// Published size of the data file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.durable_size.load(Ordering::Acquire)
    }

    /// Newest record timestamp, or `i64::MIN` if empty.
    #[must_use]
    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp.load(Ordering::Acquire)
    }

    /// Returns true if the segment holds no published records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Returns true once the segment is immutable.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// File paths, if this segment is file-backed.
    #[must_use]
    pub fn files(&self) -> Option<&SegmentFiles> {
        self.files.as_ref()
    }

    /// Number of sparse index entries.
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Appends one record and returns its byte position.
    ///
    /// The record is not visible to readers until [`Segment::flush`].
    ///
    /// # Errors
    ///
    /// See [`Segment::append_batch`].
    pub fn append(&self, record: &Record) -> CoreResult<u64> {
        let positions = self.append_batch(std::slice::from_ref(record))?;
        Ok(positions[0])
    }

    /// Appends records with a single backend write and returns their byte
    /// positions.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the segment is sealed, offsets do not increase,
    ///   or a record does not fit the 32-bit index
    /// - Storage errors from the backend write
    pub fn append_batch(&self, records: &[Record]) -> CoreResult<Vec<u64>> {
        if self.is_sealed() {
            return Err(CoreError::invalid_operation(format!(
                "segment {} is sealed",
                self.base_offset
            )));
        }

        let mut writer = self.writer.lock();
        let mut buf = Vec::with_capacity(records.iter().map(Record::encoded_size).sum());
        let mut positions = Vec::with_capacity(records.len());
        let mut entries = Vec::new();
        let mut next_offset = writer.next_offset;
        let mut max_timestamp = writer.max_timestamp;
        let mut count = writer.records_written;

        for record in records {
            if record.offset < next_offset {
                return Err(CoreError::invalid_operation(format!(
                    "offset {} does not follow {}",
                    record.offset,
                    next_offset.saturating_sub(1)
                )));
            }
            let position = writer.written + buf.len() as u64;
            let relative = u32::try_from(record.offset - self.base_offset).ok();
            let position32 = u32::try_from(position).ok();
            let (Some(relative), Some(position32)) = (relative, position32) else {
                return Err(CoreError::invalid_operation(format!(
                    "offset {} at position {position} exceeds the index range of segment {}",
                    record.offset, self.base_offset
                )));
            };

            if count % u64::from(self.index_interval) == 0 {
                entries.push(IndexEntry::new(relative, position32));
            }
            record.encode_into(&mut buf);
            positions.push(position);
            next_offset = record.offset + 1;
            max_timestamp = max_timestamp.max(record.timestamp);
            count += 1;
        }

        self.data.append(&buf)?;
        writer.written += buf.len() as u64;
        writer.records_written = count;
        writer.next_offset = next_offset;
        writer.max_timestamp = max_timestamp;
        writer.pending_index.extend(entries);
        Ok(positions)
    }

    /// Makes appended records durable (if `sync`) and visible to readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend flush or sync fails. Nothing new is
    /// published in that case.
    pub fn flush(&self, sync: bool) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        if writer.written == self.size() {
            return Ok(());
        }

        if sync {
            self.data.sync()?;
        } else {
            self.data.flush()?;
        }

        self.record_count.store(writer.records_written, Ordering::Release);
        self.next_offset.store(writer.next_offset, Ordering::Release);
        self.max_timestamp.store(writer.max_timestamp, Ordering::Release);
        self.durable_size.store(writer.written, Ordering::Release);
        let pending = std::mem::take(&mut writer.pending_index);
        self.index.extend(&pending);
        Ok(())
    }

    /// Marks the segment immutable and writes its index file.
    ///
    /// Unpublished appends are flushed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the index write fails.
    pub fn seal(&self) -> CoreResult<()> {
        self.flush(true)?;
        let _writer = self.writer.lock();
        if self.sealed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let encoded = self.index.encode();
        let result = self.write_index(&encoded);
        if result.is_err() {
            self.sealed.store(false, Ordering::Release);
        }
        result
    }

    fn write_index(&self, encoded: &[u8]) -> CoreResult<()> {
        self.index_store.truncate(0)?;
        self.index_store.append(encoded)?;
        self.index_store.sync()?;
        Ok(())
    }

    /// Reads the record whose frame starts at `position`.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if `position` is not inside the published range
    /// - `SegmentCorruption` if the frame is truncated or malformed
    /// - `CorruptRecord` if the checksum fails
    pub fn read_at(&self, position: u64) -> CoreResult<Record> {
        let size = self.size();
        if position >= size {
            return Err(CoreError::invalid_operation(format!(
                "position {position} is beyond the published size {size}"
            )));
        }

        let mut scanner = FrameScanner::new(self.data.as_ref(), position, size);
        match scanner.next_step()? {
            Some(ScanStep::Frame { record, .. }) => record,
            Some(ScanStep::Invalid { error, .. }) => Err(error),
            Some(ScanStep::Torn { .. }) | None => Err(CoreError::segment_corruption(
                format!("frame at position {position} runs past the end of the segment"),
            )),
        }
    }

    /// Reads up to `max` records with offsets in `[from, until)`.
    ///
    /// Records are pushed to `out`; a record failing its checksum is pushed
    /// as `Err(CorruptRecord)` and reading continues. If framing is lost, or
    /// a frame's offset does not increase or lies past the published end, a
    /// `SegmentCorruption` entry is pushed and reading of this segment stops.
    ///
    /// Returns the offset following the last frame consumed, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend read fails.
    pub fn read_from(
        &self,
        from: u64,
        until: u64,
        max: usize,
        out: &mut Vec<CoreResult<Record>>,
    ) -> CoreResult<Option<u64>> {
        let size = self.size();
        let relative = from.saturating_sub(self.base_offset);
        let start = self
            .index
            .find(u32::try_from(relative).unwrap_or(u32::MAX), size);

        let limit = self.next_offset();
        let mut scanner = FrameScanner::new(self.data.as_ref(), start, size);
        let mut taken = 0;
        let mut resume = None;
        let mut previous: Option<u64> = None;

        while taken < max {
            let Some(step) = scanner.next_step()? else {
                break;
            };
            match step {
                ScanStep::Frame {
                    position,
                    header,
                    record,
                } => {
                    let out_of_sequence = header.offset < self.base_offset
                        || header.offset >= limit
                        || previous.is_some_and(|p| header.offset <= p);
                    if out_of_sequence {
                        warn!(
                            base_offset = self.base_offset,
                            position,
                            offset = header.offset,
                            "frame offset out of sequence"
                        );
                        out.push(Err(CoreError::segment_corruption(format!(
                            "segment {} position {position}: offset {} out of sequence",
                            self.base_offset, header.offset
                        ))));
                        break;
                    }
                    previous = Some(header.offset);
                    if header.offset < from {
                        continue;
                    }
                    if header.offset >= until {
                        break;
                    }
                    if let Err(e) = &record {
                        warn!(
                            base_offset = self.base_offset,
                            offset = header.offset,
                            error = %e,
                            "corrupt record"
                        );
                    }
                    out.push(record);
                    resume = Some(header.offset + 1);
                    taken += 1;
                }
                ScanStep::Torn { position } => {
                    out.push(Err(CoreError::segment_corruption(format!(
                        "segment {} frame at position {position} runs past the published end",
                        self.base_offset
                    ))));
                    break;
                }
                ScanStep::Invalid { position, error } => {
                    warn!(base_offset = self.base_offset, position, error = %error, "lost framing");
                    out.push(Err(CoreError::segment_corruption(format!(
                        "segment {} position {position}: {error}",
                        self.base_offset
                    ))));
                    break;
                }
            }
        }
        Ok(resume)
    }

    /// Returns a scanner over every published frame.
    pub(crate) fn scan(&self) -> FrameScanner<'_> {
        FrameScanner::new(self.data.as_ref(), 0, self.size())
    }

    /// Removes the segment's files.
    ///
    /// Readers that still hold this segment keep working on Unix, where an
    /// open file outlives its directory entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn delete_files(&self) -> CoreResult<()> {
        if let Some(files) = &self.files {
            files.remove()?;
        }
        Ok(())
    }
}

/// Checks a frame offset against its segment and the frame before it.
///
/// The checksum does not cover the offset field. Active segments are never compacted and
/// must be gapless from their base; sealed segments only need to increase
/// and stay inside the 32-bit relative range.
fn check_frame_offset(
    offset: u64,
    base_offset: u64,
    expected: Option<u64>,
    sealed: bool,
) -> Result<(), &'static str> {
    let relative = offset.checked_sub(base_offset).ok_or("below the segment base")?;
    if u32::try_from(relative).is_err() {
        return Err("outside the segment's index range");
    }
    let expected = expected.unwrap_or(base_offset);
    if sealed {
        if offset < expected {
            return Err("not above the previous frame");
        }
    } else if offset != expected {
        return Err("not the next offset of the active segment");
    }
    Ok(())
}

fn recover(
    data: &dyn StorageBackend,
    base_offset: u64,
    interval: u64,
    sealed: bool,
) -> CoreResult<Recovered> {
    let size = data.size()?;
    let mut scanner = FrameScanner::new(data, 0, size);
    let mut recovered = Recovered {
        max_timestamp: i64::MIN,
        ..Recovered::default()
    };

    while let Some(step) = scanner.next_step()? {
        match step {
            ScanStep::Frame {
                position, header, ..
            } => {
                if let Err(reason) = check_frame_offset(
                    header.offset,
                    base_offset,
                    recovered.next_offset,
                    sealed,
                ) {
                    warn!(
                        base_offset,
                        position,
                        offset = header.offset,
                        reason,
                        "frame offset out of sequence"
                    );
                    recovered.broken_at = Some(position);
                    break;
                }
                if recovered.records % interval == 0 {
                    let relative = header.offset.checked_sub(base_offset);
                    if let (Some(Ok(relative)), Ok(position)) =
                        (relative.map(u32::try_from), u32::try_from(position))
                    {
                        recovered.entries.push(IndexEntry::new(relative, position));
                    }
                }
                recovered.records += 1;
                recovered.next_offset = Some(header.offset.saturating_add(1));
                recovered.max_timestamp = recovered.max_timestamp.max(header.timestamp);
            }
            ScanStep::Torn { position } | ScanStep::Invalid { position, .. } => {
                recovered.broken_at = Some(position);
            }
        }
    }
    Ok(recovered)
}

fn load_or_rebuild_index(
    store: &dyn StorageBackend,
    data_size: u64,
    rebuilt: Vec<IndexEntry>,
    base_offset: u64,
) -> CoreResult<Vec<IndexEntry>> {
    let stored_len = usize::try_from(store.size()?).unwrap_or(usize::MAX);
    if stored_len > 0 {
        let stored = store.read_at(0, stored_len)?;
        if let Ok(entries) = OffsetIndex::decode(&stored, data_size) {
            return Ok(entries);
        }
    } else if rebuilt.is_empty() {
        return Ok(rebuilt);
    }

    info!(base_offset, entries = rebuilt.len(), "rebuilding segment index");
    let index = OffsetIndex::from_entries(rebuilt);
    store.truncate(0)?;
    store.append(&index.encode())?;
    store.sync()?;
    Ok(index.entries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;
    use tidelog_storage::InMemoryBackend;

    fn record(offset: u64, value: &str) -> Record {
        Record::new(
            offset,
            offset as i64 * 10,
            Some(Bytes::from(format!("k{offset}"))),
            Bytes::from(value.to_string()),
        )
    }

    fn memory_segment(base: u64, interval: u32) -> Segment {
        Segment::from_backends(
            base,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            interval,
            false,
        )
        .unwrap()
    }

    fn read_all(segment: &Segment, from: u64) -> Vec<Record> {
        let mut out = Vec::new();
        segment.read_from(from, u64::MAX, usize::MAX, &mut out).unwrap();
        out.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn append_then_flush_publishes() {
        let segment = memory_segment(0, 2);
        let pos = segment.append(&record(0, "a")).unwrap();
        assert_eq!(pos, 0);
        assert_eq!(segment.size(), 0);
        assert!(read_all(&segment, 0).is_empty());

        segment.flush(true).unwrap();
        assert_eq!(segment.record_count(), 1);
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.read_at(pos).unwrap(), record(0, "a"));
    }

    #[test]
    fn append_batch_returns_positions() {
        let segment = memory_segment(10, 1);
        let records: Vec<_> = (10..13).map(|o| record(o, "value")).collect();
        let positions = segment.append_batch(&records).unwrap();
        segment.flush(false).unwrap();

        assert_eq!(positions[0], 0);
        for (record, position) in records.iter().zip(&positions) {
            assert_eq!(&segment.read_at(*position).unwrap(), record);
        }
        assert_eq!(segment.index_len(), 3);
    }

    #[test]
    fn sparse_index_every_interval() {
        let segment = memory_segment(0, 4);
        let records: Vec<_> = (0..10).map(|o| record(o, "v")).collect();
        segment.append_batch(&records).unwrap();
        segment.flush(true).unwrap();

        let entries = segment.index.entries();
        let relatives: Vec<_> = entries.iter().map(|e| e.relative_offset).collect();
        assert_eq!(relatives, vec![0, 4, 8]);
    }

    #[test]
    fn read_from_middle_uses_index() {
        let segment = memory_segment(100, 3);
        let records: Vec<_> = (100..120).map(|o| record(o, "v")).collect();
        segment.append_batch(&records).unwrap();
        segment.flush(true).unwrap();

        let got = read_all(&segment, 107);
        assert_eq!(got.first().map(|r| r.offset), Some(107));
        assert_eq!(got.len(), 13);

        let mut out = Vec::new();
        let resume = segment.read_from(105, 108, 10, &mut out).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(resume, Some(108));
    }

    #[test]
    fn rejects_non_increasing_offsets() {
        let segment = memory_segment(0, 1);
        segment.append(&record(0, "a")).unwrap();
        assert!(matches!(
            segment.append(&record(0, "b")),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn offset_gaps_are_allowed() {
        let segment = memory_segment(0, 1);
        segment.append(&record(0, "a")).unwrap();
        segment.append(&record(5, "b")).unwrap();
        segment.flush(true).unwrap();
        assert_eq!(segment.next_offset(), 6);
        let got: Vec<_> = read_all(&segment, 1).iter().map(|r| r.offset).collect();
        assert_eq!(got, vec![5]);
    }

    #[test]
    fn sealed_segment_rejects_appends() {
        let segment = memory_segment(0, 1);
        segment.append(&record(0, "a")).unwrap();
        segment.seal().unwrap();
        assert!(segment.is_sealed());
        assert_eq!(segment.record_count(), 1);
        assert!(segment.append(&record(1, "b")).is_err());
    }

    #[test]
    fn corrupt_record_reported_in_place() {
        let segment = memory_segment(0, 1);
        let records: Vec<_> = (0..3).map(|o| record(o, "value")).collect();
        segment.append_batch(&records).unwrap();
        segment.flush(true).unwrap();

        let mut bytes = segment.data.read_at(0, segment.size() as usize).unwrap();
        let second = records[0].encoded_size();
        let last_of_second = second + records[1].encoded_size() - 1;
        bytes[last_of_second] ^= 0x01;
        let corrupted = Segment::from_backends(
            0,
            Box::new(InMemoryBackend::with_data(bytes)),
            Box::new(InMemoryBackend::new()),
            1,
            true,
        )
        .unwrap();

        let mut out = Vec::new();
        corrupted.read_from(0, u64::MAX, 10, &mut out).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(CoreError::CorruptRecord { offset: 1, .. })));
        assert_eq!(out[2].as_ref().unwrap().offset, 2);
    }

    #[test]
    fn recovery_truncates_torn_tail_of_active_segment() {
        let mut bytes = Vec::new();
        for offset in 0..3 {
            record(offset, "value").encode_into(&mut bytes);
        }
        let good = bytes.len() as u64;
        record(3, "torn").encode_into(&mut bytes);
        bytes.truncate(bytes.len() - 2);

        let segment = Segment::from_backends(
            0,
            Box::new(InMemoryBackend::with_data(bytes)),
            Box::new(InMemoryBackend::new()),
            2,
            false,
        )
        .unwrap();

        assert_eq!(segment.size(), good);
        assert_eq!(segment.record_count(), 3);
        assert_eq!(segment.next_offset(), 3);
        assert_eq!(segment.data.size().unwrap(), good);
        assert_eq!(segment.append(&record(3, "again")).unwrap(), good);
    }

    /// Encodes `count` records and flips `mask` into byte `at` of the offset
    /// field of record `target`.
    fn damaged_offset(count: u64, target: u64, at: usize, mask: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        for offset in 0..count {
            record(offset, "value").encode_into(&mut bytes);
        }
        let frame = record(0, "value").encoded_size();
        bytes[frame * target as usize + 8 + at] ^= mask;
        bytes
    }

    #[test]
    fn read_at_torn_frame_is_corruption() {
        let mut bytes = Vec::new();
        record(0, "value").encode_into(&mut bytes);
        let second = bytes.len() as u64;
        record(1, "value").encode_into(&mut bytes);
        bytes.truncate(bytes.len() - 4);

        let segment = Segment::from_backends(
            0,
            Box::new(InMemoryBackend::with_data(bytes)),
            Box::new(InMemoryBackend::new()),
            1,
            true,
        )
        .unwrap();
        assert!(segment.read_at(0).is_ok());
        assert!(matches!(
            segment.read_at(second),
            Err(CoreError::SegmentCorruption { .. })
        ));
    }

    #[test]
    fn damaged_offset_in_sealed_segment_is_reported() {
        for (at, mask) in [(7, 0x80), (0, 0x02)] {
            let segment = Segment::from_backends(
                0,
                Box::new(InMemoryBackend::with_data(damaged_offset(6, 3, at, mask))),
                Box::new(InMemoryBackend::new()),
                1,
                true,
            )
            .unwrap();
            assert_eq!(segment.record_count(), 3);
            assert_eq!(segment.next_offset(), 3);

            let mut out = Vec::new();
            segment.read_from(0, u64::MAX, 100, &mut out).unwrap();
            assert_eq!(out.len(), 4);
            let offsets: Vec<_> = out[..3].iter().map(|r| r.as_ref().unwrap().offset).collect();
            assert_eq!(offsets, vec![0, 1, 2]);
            assert!(matches!(out[3], Err(CoreError::SegmentCorruption { .. })));
        }
    }

    #[test]
    fn damaged_offset_ends_active_segment() {
        let bytes = damaged_offset(3, 2, 2, 0x01);
        let frame = record(0, "value").encoded_size() as u64;

        let segment = Segment::from_backends(
            0,
            Box::new(InMemoryBackend::with_data(bytes)),
            Box::new(InMemoryBackend::new()),
            1,
            false,
        )
        .unwrap();

        assert_eq!(segment.next_offset(), 2);
        assert_eq!(segment.record_count(), 2);
        assert_eq!(segment.size(), 2 * frame);
        assert_eq!(segment.append(&record(2, "again")).unwrap(), 2 * frame);
    }

    #[test]
    fn recovery_keeps_bytes_of_sealed_segment() {
        let mut bytes = Vec::new();
        record(0, "value").encode_into(&mut bytes);
        bytes.extend_from_slice(&[0u8; 40]);
        let total = bytes.len() as u64;

        let segment = Segment::from_backends(
            0,
            Box::new(InMemoryBackend::with_data(bytes)),
            Box::new(InMemoryBackend::new()),
            1,
            true,
        )
        .unwrap();
        assert_eq!(segment.size(), total);
        assert_eq!(segment.record_count(), 1);

        let mut out = Vec::new();
        segment.read_from(0, u64::MAX, 10, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(CoreError::SegmentCorruption { .. })));
    }

    #[test]
    fn file_segment_persists_and_reloads_index() {
        let dir = tempdir().unwrap();
        {
            let segment = Segment::create(dir.path(), 0, 2).unwrap();
            let records: Vec<_> = (0..5).map(|o| record(o, "persist")).collect();
            segment.append_batch(&records).unwrap();
            segment.seal().unwrap();
        }

        let files = SegmentFiles::new(dir.path(), 0);
        assert_eq!(fs::metadata(&files.index).unwrap().len(), 3 * 8);

        let segment = Segment::open(dir.path(), 0, 2, true).unwrap();
        assert!(segment.is_sealed());
        assert_eq!(segment.record_count(), 5);
        assert_eq!(segment.next_offset(), 5);
        assert_eq!(segment.max_timestamp(), 40);
        assert_eq!(segment.index_len(), 3);
        assert_eq!(read_all(&segment, 3).len(), 2);
    }

    #[test]
    fn invalid_index_file_is_rebuilt() {
        let dir = tempdir().unwrap();
        {
            let segment = Segment::create(dir.path(), 0, 1).unwrap();
            let records: Vec<_> = (0..3).map(|o| record(o, "v")).collect();
            segment.append_batch(&records).unwrap();
            segment.seal().unwrap();
        }
        let files = SegmentFiles::new(dir.path(), 0);
        fs::write(&files.index, [1u8, 2, 3]).unwrap();

        let segment = Segment::open(dir.path(), 0, 1, true).unwrap();
        assert_eq!(segment.index_len(), 3);
        assert_eq!(fs::metadata(&files.index).unwrap().len(), 24);
    }

    #[test]
    fn create_fails_if_files_exist() {
        let dir = tempdir().unwrap();
        let _first = Segment::create(dir.path(), 0, 1).unwrap();
        assert!(Segment::create(dir.path(), 0, 1).is_err());
    }

    #[test]
    fn delete_files_removes_both() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 7, 1).unwrap();
        let files = segment.files().cloned().unwrap();
        segment.delete_files().unwrap();
        assert!(!files.log.exists());
        assert!(!files.index.exists());
    }

    #[test]
    fn parse_file_names() {
        assert_eq!(parse_base_offset("00000000000000000042.log"), Some(42));
        assert_eq!(parse_base_offset("00000000000000000042.index"), None);
        assert_eq!(parse_base_offset("00000000000000000042.log.cleaned"), None);
        assert_eq!(parse_base_offset("42.log"), None);
    }
}
