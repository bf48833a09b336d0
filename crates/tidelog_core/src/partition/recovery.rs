//! Partition directory recovery and maintenance files.
//!
//! Besides segment files a partition directory may hold:
//!
//! - `cleaner-checkpoint`: offset below which every record has already been
//!   through one compaction pass
//! - `compaction.swap`: written once a compaction pass has fsynced its output
//!   and removed at the end of installing it; if present at open, the swap
//!   is completed before anything else happens

use crate::dir::{remove_if_exists, sync_dir, write_atomic};
use crate::error::{CoreError, CoreResult};
use crate::manifest::{split_crc, ByteReader};
use crate::segment::{parse_base_offset, Segment, SegmentFiles, CLEANED_SUFFIX};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the compaction swap marker.
pub const SWAP_MARKER_FILE: &str = "compaction.swap";
/// Name of the cleaner checkpoint.
pub const CHECKPOINT_FILE: &str = "cleaner-checkpoint";

const SWAP_MAGIC: [u8; 4] = *b"TLSW";
const SWAP_VERSION: u16 = 1;

/// Record of a committed compaction swap.
///
/// Once the marker is durable, the inputs are replaced by the outputs no
/// matter when the process stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapMarker {
    /// Base offsets of the segments being replaced.
    pub inputs: Vec<u64>,
    /// Base offsets of the compacted segments replacing them.
    pub outputs: Vec<u64>,
}

impl SwapMarker {
    /// Encodes the marker.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 8 * (self.inputs.len() + self.outputs.len()));
        buf.extend_from_slice(&SWAP_MAGIC);
        buf.extend_from_slice(&SWAP_VERSION.to_le_bytes());
        for list in [&self.inputs, &self.outputs] {
            buf.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for base in list {
                buf.extend_from_slice(&base.to_le_bytes());
            }
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a marker.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the marker is damaged.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body = split_crc(data, "compaction swap marker")?;
        let mut reader = ByteReader::new(body, "compaction swap marker");
        if reader.take(4)? != SWAP_MAGIC {
            return Err(CoreError::invalid_format("invalid compaction swap magic"));
        }
        let version = reader.u16()?;
        if version != SWAP_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported compaction swap version: {version}"
            )));
        }

        let mut lists = [Vec::new(), Vec::new()];
        for list in &mut lists {
            let count = reader.u32()?;
            for _ in 0..count {
                list.push(reader.u64()?);
            }
        }
        reader.finish()?;
        let [inputs, outputs] = lists;
        Ok(Self { inputs, outputs })
    }

    /// Replaces input files with output files in `dir`.
    ///
    /// Safe to call again after a crash part-way through: an output still
    /// carrying the `.cleaned` suffix has not been installed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed or renamed.
    pub fn install(&self, dir: &Path) -> CoreResult<()> {
        for &base in &self.inputs {
            let installed = self.outputs.contains(&base)
                && !SegmentFiles::cleaned(dir, base).log.exists();
            if !installed {
                SegmentFiles::new(dir, base).remove()?;
            }
        }

        for &base in &self.outputs {
            let cleaned = SegmentFiles::cleaned(dir, base);
            let live = SegmentFiles::new(dir, base);
            if cleaned.index.exists() {
                fs::rename(&cleaned.index, &live.index)?;
            }
            if cleaned.log.exists() {
                fs::rename(&cleaned.log, &live.log)?;
            }
        }
        sync_dir(dir)
    }

    /// Writes the marker durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        write_atomic(&dir.join(SWAP_MARKER_FILE), &self.encode())
    }

    /// Removes the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn clear(dir: &Path) -> CoreResult<()> {
        if remove_if_exists(&dir.join(SWAP_MARKER_FILE))? {
            sync_dir(dir)?;
        }
        Ok(())
    }
}

/// Reads the cleaner checkpoint, or 0 if there is none.
///
/// A damaged checkpoint is logged and treated as 0, which only delays
/// tombstone removal by one pass.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_checkpoint(dir: &Path) -> CoreResult<u64> {
    let data = match fs::read(dir.join(CHECKPOINT_FILE)) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let parsed = split_crc(&data, "cleaner checkpoint").and_then(|body| {
        let mut reader = ByteReader::new(body, "cleaner checkpoint");
        let offset = reader.u64()?;
        reader.finish()?;
        Ok(offset)
    });
    match parsed {
        Ok(offset) => Ok(offset),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "ignoring damaged cleaner checkpoint");
            Ok(0)
        }
    }
}

/// Writes the cleaner checkpoint durably.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_checkpoint(dir: &Path, offset: u64) -> CoreResult<()> {
    let mut buf = offset.to_le_bytes().to_vec();
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    write_atomic(&dir.join(CHECKPOINT_FILE), &buf)
}

/// Removes compaction output that was never committed.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a file removed.
pub fn remove_cleaned_files(dir: &Path) -> CoreResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_cleaned = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(CLEANED_SUFFIX));
        if is_cleaned && remove_if_exists(&path)? {
            removed += 1;
        }
    }
    if removed > 0 {
        sync_dir(dir)?;
    }
    Ok(removed)
}

/// State of a partition directory after recovery.
#[derive(Debug)]
pub struct RecoveredPartition {
    /// Segments ordered by base offset; the last one is active.
    pub segments: Vec<Arc<Segment>>,
    /// Cleaner checkpoint.
    pub checkpoint: u64,
}

/// Brings a partition directory to a consistent state and opens its segments.
///
/// 1. Completes a committed compaction swap, or deletes uncommitted output
/// 2. Opens every segment, all but the newest as sealed
/// 3. Creates segment 0 if the partition is new
///
/// # Errors
///
/// Returns an error if files cannot be read, the swap marker is damaged, or
/// segment offset ranges overlap.
pub fn recover_partition(dir: &Path, index_interval: u32) -> CoreResult<RecoveredPartition> {
    fs::create_dir_all(dir)?;

    let marker_path = dir.join(SWAP_MARKER_FILE);
    if marker_path.exists() {
        let marker = SwapMarker::decode(&fs::read(&marker_path)?)?;
        info!(
            dir = %dir.display(),
            inputs = marker.inputs.len(),
            outputs = marker.outputs.len(),
            "completing interrupted compaction swap"
        );
        marker.install(dir)?;
        SwapMarker::clear(dir)?;
    } else {
        let removed = remove_cleaned_files(dir)?;
        if removed > 0 {
            info!(dir = %dir.display(), removed, "discarded uncommitted compaction output");
        }
    }

    let mut bases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(base) = entry.file_name().to_str().and_then(parse_base_offset) {
            bases.push(base);
        }
    }
    bases.sort_unstable();

    let mut segments: Vec<Arc<Segment>> = Vec::with_capacity(bases.len().max(1));
    for (i, &base) in bases.iter().enumerate() {
        let sealed = i + 1 < bases.len();
        let segment = Segment::open(dir, base, index_interval, sealed)?;
        if let Some(prev) = segments.last() {
            if prev.next_offset() > base {
                return Err(CoreError::segment_corruption(format!(
                    "segment {} ends at {} past the start of segment {base}",
                    prev.base_offset(),
                    prev.next_offset()
                )));
            }
        }
        segments.push(Arc::new(segment));
    }

    if segments.is_empty() {
        segments.push(Arc::new(Segment::create(dir, 0, index_interval)?));
        sync_dir(dir)?;
    }

    Ok(RecoveredPartition {
        segments,
        checkpoint: read_checkpoint(dir)?,
    })
}
