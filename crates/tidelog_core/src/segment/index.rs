//! Sparse offset index.
//!
//! Each entry maps a record's offset, relative to the segment base, to the
//! byte position of its frame in the data file:
//!
//! ```text
//! | relative_offset (4) | position (4) |
//! ```
//!
//! Entries are added every `index_interval` records, so the index stays
//! small and a lookup is a binary search followed by a short forward scan.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::read_u32;
use parking_lot::RwLock;

/// Size of one encoded index entry.
pub const INDEX_ENTRY_SIZE: usize = 8;

/// One sparse index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset minus the segment base offset.
    pub relative_offset: u32,
    /// Byte position of the frame in the data file.
    pub position: u32,
}

impl IndexEntry {
    /// Creates a new entry.
    #[must_use]
    pub const fn new(relative_offset: u32, position: u32) -> Self {
        Self {
            relative_offset,
            position,
        }
    }

    /// Encodes the entry.
    #[must_use]
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[..4].copy_from_slice(&self.relative_offset.to_le_bytes());
        buf[4..].copy_from_slice(&self.position.to_le_bytes());
        buf
    }

    /// Decodes an entry from exactly [`INDEX_ENTRY_SIZE`] bytes.
    #[must_use]
    pub fn decode(data: &[u8; INDEX_ENTRY_SIZE]) -> Self {
        Self {
            relative_offset: read_u32(data, 0),
            position: read_u32(data, 4),
        }
    }
}

/// Sparse offset to byte-position index for one segment.
///
/// Readers search while the writer publishes new entries; both relative
/// offsets and positions are strictly increasing.
#[derive(Debug, Default)]
pub struct OffsetIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl OffsetIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index from already validated entries.
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Publishes entries. Entries that do not extend the index are ignored.
    pub fn extend(&self, new_entries: &[IndexEntry]) {
        if new_entries.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        for entry in new_entries {
            let extends = entries.last().map_or(true, |last| {
                entry.relative_offset > last.relative_offset && entry.position > last.position
            });
            if extends {
                entries.push(*entry);
            }
        }
    }

    /// Returns the scan start position for `relative_offset`.
    ///
    /// This is the position of the greatest entry whose relative offset is
    /// at or below the target and whose position lies before `limit`, or 0
    /// if there is none.
    #[must_use]
    pub fn find(&self, relative_offset: u32, limit: u64) -> u64 {
        let entries = self.entries.read();
        let idx = entries.partition_point(|e| {
            e.relative_offset <= relative_offset && u64::from(e.position) < limit
        });
        if idx == 0 {
            0
        } else {
            u64::from(entries[idx - 1].position)
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a copy of the entries.
    #[must_use]
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries.read().clone()
    }

    /// Encodes all entries in index file format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let entries = self.entries.read();
        let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
        for entry in entries.iter() {
            buf.extend_from_slice(&entry.encode());
        }
        buf
    }

    /// Decodes and validates an index file.
    ///
    /// `data_size` is the size of the segment's data file; every entry must
    /// point inside it.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorruption` if the file is not a whole number of
    /// entries, entries are not strictly increasing, or a position lies
    /// outside the data file.
    pub fn decode(data: &[u8], data_size: u64) -> CoreResult<Vec<IndexEntry>> {
        if data.len() % INDEX_ENTRY_SIZE != 0 {
            return Err(CoreError::segment_corruption(format!(
                "index size {} is not a multiple of {INDEX_ENTRY_SIZE}",
                data.len()
            )));
        }

        let mut entries: Vec<IndexEntry> = Vec::with_capacity(data.len() / INDEX_ENTRY_SIZE);
        for chunk in data.chunks_exact(INDEX_ENTRY_SIZE) {
            let mut raw = [0u8; INDEX_ENTRY_SIZE];
            raw.copy_from_slice(chunk);
            let entry = IndexEntry::decode(&raw);

            if u64::from(entry.position) >= data_size {
                return Err(CoreError::segment_corruption(format!(
                    "index entry position {} beyond data size {data_size}",
                    entry.position
                )));
            }
            if let Some(last) = entries.last() {
                if entry.relative_offset <= last.relative_offset || entry.position <= last.position
                {
                    return Err(CoreError::segment_corruption(
                        "index entries are not strictly increasing",
                    ));
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}
