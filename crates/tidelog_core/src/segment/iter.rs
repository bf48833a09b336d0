//! Buffered frame scanner.
//!
//! Walks record frames of a data file from a start position up to an end
//! position, reading the backend in large chunks rather than per frame.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{FrameHeader, Record, HEADER_SIZE};
use bytes::Bytes;
use tidelog_storage::StorageBackend;

/// Read chunk size.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// One step of a frame walk.
#[derive(Debug)]
pub(crate) enum ScanStep {
    /// A complete frame. `record` is `Err(CorruptRecord)` on checksum mismatch.
    Frame {
        position: u64,
        header: FrameHeader,
        record: CoreResult<Record>,
    },
    /// The remaining bytes are shorter than the frame they start.
    Torn { position: u64 },
    /// The length fields at `position` cannot describe a frame.
    Invalid { position: u64, error: CoreError },
}

/// Sequential reader over the frames of one data file.
///
/// Stops after the first `Torn` or `Invalid` step: once framing is lost
/// there is no way to find the next frame boundary.
pub(crate) struct FrameScanner<'a> {
    backend: &'a dyn StorageBackend,
    position: u64,
    end: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    finished: bool,
}

impl<'a> FrameScanner<'a> {
    /// Creates a scanner over `[start, end)`.
    pub fn new(backend: &'a dyn StorageBackend, start: u64, end: u64) -> Self {
        Self {
            backend,
            position: start,
            end,
            buffer: Vec::new(),
            buffer_start: start,
            finished: false,
        }
    }

    /// Position of the next frame.
    #[cfg(test)]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Makes `need` bytes from the current position available in the buffer.
    ///
    /// Returns `false` if the scan range ends first.
    fn fill(&mut self, need: usize) -> CoreResult<bool> {
        let at = (self.position - self.buffer_start) as usize;
        if at + need <= self.buffer.len() {
            return Ok(true);
        }
        if self.position.saturating_add(need as u64) > self.end {
            return Ok(false);
        }

        let remaining = usize::try_from(self.end - self.position).unwrap_or(usize::MAX);
        let read_len = need.max(READ_BUFFER_SIZE).min(remaining);
        self.buffer = self.backend.read_at(self.position, read_len)?;
        self.buffer_start = self.position;
        Ok(true)
    }

    /// Returns the next step, or `None` at the end of the range.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend read fails.
    pub fn next_step(&mut self) -> CoreResult<Option<ScanStep>> {
        if self.finished || self.position >= self.end {
            return Ok(None);
        }
        let position = self.position;

        if !self.fill(HEADER_SIZE)? {
            self.finished = true;
            return Ok(Some(ScanStep::Torn { position }));
        }

        let at = (position - self.buffer_start) as usize;
        let header = match FrameHeader::parse(&self.buffer[at..]) {
            Ok(header) => header,
            Err(error) => {
                self.finished = true;
                return Ok(Some(ScanStep::Invalid { position, error }));
            }
        };

        if !self.fill(header.frame_len)? {
            self.finished = true;
            return Ok(Some(ScanStep::Torn { position }));
        }

        let at = (position - self.buffer_start) as usize;
        let frame = Bytes::copy_from_slice(&self.buffer[at..at + header.frame_len]);
        let record = Record::decode_bytes(frame);
        self.position += header.frame_len as u64;

        Ok(Some(ScanStep::Frame {
            position,
            header,
            record,
        }))
    }
}
