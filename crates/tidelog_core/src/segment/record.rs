//! Record frame codec.
//!
//! ```text
//! | length (4) | crc32 (4) | offset (8) | timestamp (8) | key_len (4) | key (K) | value (V) |
//! ```
//!
//! All integers are little-endian. `length` counts every byte after the
//! length field. `crc32` covers the key bytes followed by the value bytes.
//! A `key_len` of zero means the record has no key.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use std::fmt;

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 4;

/// Size of the fixed frame header, length prefix included.
pub const HEADER_SIZE: usize = 28;

/// Smallest legal value of the length field.
const MIN_BODY_LEN: usize = HEADER_SIZE - LENGTH_SIZE;

/// Computes the record checksum over key then value.
#[must_use]
pub fn compute_crc(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Returns the encoded size of a record with the given key and value sizes.
#[must_use]
pub const fn frame_size(key_len: usize, value_len: usize) -> usize {
    HEADER_SIZE + key_len + value_len
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition-local offset.
    pub offset: u64,
    /// Append time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Routing and compaction key.
    pub key: Option<Bytes>,
    /// Payload. Empty for a tombstone.
    pub value: Bytes,
    /// Checksum over key and value.
    pub crc32: u32,
}

impl Record {
    /// Creates a record and computes its checksum.
    ///
    /// An empty key is stored as no key.
    #[must_use]
    pub fn new(offset: u64, timestamp: i64, key: Option<Bytes>, value: Bytes) -> Self {
        let key = key.filter(|k| !k.is_empty());
        let crc32 = compute_crc(key.as_deref().unwrap_or_default(), &value);
        Self {
            offset,
            timestamp,
            key,
            value,
            crc32,
        }
    }

    /// Returns true if this record is a delete marker for its key.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.key.is_some() && self.value.is_empty()
    }

    /// Returns the key bytes, empty if the record has no key.
    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().unwrap_or_default()
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        frame_size(self.key_bytes().len(), self.value.len())
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let key = self.key_bytes();
        let body_len = self.encoded_size() - LENGTH_SIZE;

        buf.reserve(self.encoded_size());
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&self.value);
    }

    /// Encodes the record to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a complete frame and verifies its checksum.
    ///
    /// # Errors
    ///
    /// - `SegmentCorruption` if the frame is truncated or its lengths are inconsistent
    /// - `CorruptRecord` if the checksum does not match the stored bytes
    pub fn decode(frame: &[u8]) -> CoreResult<Self> {
        Self::decode_bytes(Bytes::copy_from_slice(frame))
    }

    /// Decodes a frame held in a shared buffer without copying key or value.
    pub(crate) fn decode_bytes(frame: Bytes) -> CoreResult<Self> {
        let header = FrameHeader::parse(&frame)?;
        if frame.len() < header.frame_len {
            return Err(CoreError::segment_corruption(format!(
                "incomplete frame: need {} bytes, have {}",
                header.frame_len,
                frame.len()
            )));
        }

        let key_start = HEADER_SIZE;
        let value_start = key_start + header.key_len;
        let key = &frame[key_start..value_start];
        let value = &frame[value_start..header.frame_len];

        let actual = compute_crc(key, value);
        if actual != header.crc32 {
            return Err(CoreError::CorruptRecord {
                offset: header.offset,
                expected: header.crc32,
                actual,
            });
        }

        let key = (header.key_len > 0).then(|| frame.slice(key_start..value_start));
        Ok(Self {
            offset: header.offset,
            timestamp: header.timestamp,
            key,
            value: frame.slice(value_start..header.frame_len),
            crc32: header.crc32,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset {} at {}ms ({} bytes)",
            self.offset,
            self.timestamp,
            self.value.len()
        )
    }
}

/// The fixed-size part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    /// Total frame size including the length prefix.
    pub frame_len: usize,
    pub crc32: u32,
    pub offset: u64,
    pub timestamp: i64,
    pub key_len: usize,
}

impl FrameHeader {
    /// Parses the header at the start of `data`.
    ///
    /// Fails with `SegmentCorruption` if fewer than [`HEADER_SIZE`] bytes are
    /// available or the length fields cannot describe a valid frame.
    pub fn parse(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::segment_corruption(format!(
                "frame header needs {HEADER_SIZE} bytes, have {}",
                data.len()
            )));
        }

        let body_len = read_u32(data, 0) as usize;
        let key_len = read_u32(data, 24) as usize;
        if body_len < MIN_BODY_LEN || key_len > body_len - MIN_BODY_LEN {
            return Err(CoreError::segment_corruption(format!(
                "invalid frame lengths: body {body_len}, key {key_len}"
            )));
        }

        Ok(Self {
            frame_len: body_len + LENGTH_SIZE,
            crc32: read_u32(data, 4),
            offset: read_u64(data, 8),
            timestamp: read_u64(data, 16) as i64,
            key_len,
        })
    }
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}
