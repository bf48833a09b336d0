//! Pending batches and append tickets.

use crate::error::CoreResult;
use crate::partition::PartitionLog;
use crate::segment::Record;
use std::time::{Duration, Instant};

/// Records admitted to a partition but not yet written.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    records: Vec<Record>,
    bytes: u64,
    started: Option<Instant>,
}

impl PendingBatch {
    pub fn push(&mut self, record: Record, encoded_size: u64) {
        if self.records.is_empty() {
            self.started = Some(Instant::now());
        }
        self.bytes += encoded_size;
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// When the first record of the batch arrived.
    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    /// Empties the batch and returns its records.
    pub fn take(&mut self) -> Vec<Record> {
        self.bytes = 0;
        self.started = None;
        std::mem::take(&mut self.records)
    }
}

/// Receipt for a record admitted to a partition's pending batch.
///
/// The offset is assigned as soon as the ticket exists. Durability is
/// confirmed separately: [`AppendTicket::wait`] blocks until the batch has
/// been flushed, [`AppendTicket::wait_timeout`] bounds that wait, and
/// [`AppendTicket::flush`] forces the batch out instead of waiting for the
/// linger deadline. Dropping a ticket abandons the wait, not the record.
#[derive(Debug)]
#[must_use = "the record is not known to be durable until the ticket is waited on"]
pub struct AppendTicket<'a> {
    log: &'a PartitionLog,
    offset: u64,
}

impl<'a> AppendTicket<'a> {
    pub(crate) fn new(log: &'a PartitionLog, offset: u64) -> Self {
        Self { log, offset }
    }

    /// The offset assigned to the record.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns true if the record is already durable and visible.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.log.high_watermark() > self.offset
    }

    /// Blocks until the record's batch is durable and returns its offset.
    ///
    /// # Errors
    ///
    /// - `PartitionDegraded` if the batch could not be written
    /// - `PartitionClosed` if the partition closed first
    pub fn wait(self) -> CoreResult<u64> {
        self.log.wait_durable(self.offset, None)?;
        Ok(self.offset)
    }

    /// Like [`AppendTicket::wait`] but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` if the batch is still pending when the timeout
    /// expires; the record stays queued.
    ///
    /// # Errors
    ///
    /// Same as [`AppendTicket::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> CoreResult<Option<u64>> {
        let deadline = Instant::now() + timeout;
        let durable = self.log.wait_durable(self.offset, Some(deadline))?;
        Ok(durable.then_some(self.offset))
    }

    /// Flushes the pending batch now and returns the offset once durable.
    ///
    /// # Errors
    ///
    /// Returns the write error if this call performed a failing flush,
    /// otherwise the same errors as [`AppendTicket::wait`].
    pub fn flush(self) -> CoreResult<u64> {
        if !self.is_durable() {
            self.log.flush()?;
        }
        self.wait()
    }
}
