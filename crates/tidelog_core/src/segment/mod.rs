//! Segment storage for log records.
//!
//! A partition's offset space is split into segments. Each segment is a
//! data file of record frames plus a sparse index file, both named after
//! the segment's base offset:
//!
//! ```text
//! 00000000000000000000.log     | length (4) | crc32 (4) | offset (8) | timestamp (8) | key_len (4) | key | value |
//! 00000000000000000000.index   | relative_offset (4) | position (4) |
//! ```
//!
//! Only the newest segment of a partition is active; all others are sealed
//! and never modified in place.

mod index;
mod iter;
mod log;
mod record;

pub(crate) use iter::ScanStep;
pub use index::{IndexEntry, OffsetIndex, INDEX_ENTRY_SIZE};
pub use log::{
    parse_base_offset, Segment, SegmentFiles, CLEANED_SUFFIX, INDEX_EXTENSION, LOG_EXTENSION,
};
pub use record::{compute_crc, frame_size, Record, HEADER_SIZE, LENGTH_SIZE};
