//! Crash and corruption simulation for Tidelog.
//!
//! Two tools live here:
//!
//! 1. [`FaultyBackend`] wraps a storage backend and can tear a write after a
//!    byte budget, or fail `flush`/`sync` or reads, as a crash or a bad disk would.
//! 2. File helpers that damage a closed store on disk: flip a byte, cut a
//!    segment short or append a partial frame.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidelog_testkit::crash::{FaultyBackend, SharedBackend};
//!
//! let faulty = FaultyBackend::new(SharedBackend::memory());
//! faulty.tear_after(100);
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tidelog_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// A backend handle that can be cloned and reopened.
///
/// Segments own their backends, so a test that wants to look at the bytes
/// after a segment is gone keeps one clone and hands out another.
#[derive(Clone)]
pub struct SharedBackend(Arc<dyn StorageBackend>);

impl SharedBackend {
    /// Wraps an existing backend.
    pub fn new(inner: impl StorageBackend + 'static) -> Self {
        Self(Arc::new(inner))
    }

    /// A fresh in-memory backend.
    pub fn memory() -> Self {
        Self::new(InMemoryBackend::new())
    }

    /// Returns every stored byte.
    pub fn contents(&self) -> StorageResult<Vec<u8>> {
        let size = self.0.size()?;
        self.0.read_at(0, usize::try_from(size).unwrap_or(usize::MAX))
    }
}

impl StorageBackend for SharedBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.0.read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        self.0.append(data)
    }

    fn flush(&self) -> StorageResult<()> {
        self.0.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.0.size()
    }

    fn sync(&self) -> StorageResult<()> {
        self.0.sync()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.0.truncate(new_size)
    }
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

/// A storage backend wrapper that can simulate crashes.
pub struct FaultyBackend {
    inner: SharedBackend,
    tear_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
    fail_on_read: AtomicBool,
}

impl FaultyBackend {
    /// Creates a new faulty backend wrapping an inner backend.
    pub fn new(inner: SharedBackend) -> Self {
        Self {
            inner,
            tear_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
            fail_on_read: AtomicBool::new(false),
        }
    }

    /// Makes writes fail once `bytes` bytes have been written in total.
    ///
    /// The write that crosses the limit stores its leading part and fails.
    pub fn tear_after(&self, bytes: u64) {
        self.tear_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether `flush` and `sync` should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Sets whether `read_at` should fail.
    pub fn set_fail_on_read(&self, fail: bool) {
        self.fail_on_read.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.tear_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
        self.fail_on_read.store(false, Ordering::SeqCst);
    }

    /// Returns whether a fault has fired.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Total bytes accepted so far, torn writes included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.fail_on_read.load(Ordering::SeqCst) {
            return Err(simulated("simulated read failure"));
        }
        self.inner.read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let len = data.len() as u64;
        let current = self.bytes_written.load(Ordering::SeqCst);
        let limit = self.tear_after_bytes.load(Ordering::SeqCst);

        if current >= limit {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during write"));
        }

        if current + len > limit {
            self.crashed.store(true, Ordering::SeqCst);
            let partial = usize::try_from(limit - current).unwrap_or(data.len());
            self.inner.append(&data[..partial])?;
            self.bytes_written.fetch_add(partial as u64, Ordering::SeqCst);
            return Err(simulated("simulated crash during partial write"));
        }

        let position = self.inner.append(data)?;
        self.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(position)
    }

    fn flush(&self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// XORs the byte at `position` of a file with `0xff`.
pub fn flip_byte(path: &Path, position: u64) -> io::Result<()> {
    let mut data = fs::read(path)?;
    let index = usize::try_from(position)
        .ok()
        .filter(|&i| i < data.len())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "position past end of file"))?;
    data[index] ^= 0xff;
    fs::write(path, data)
}

/// Removes the last `bytes` bytes of a file.
pub fn truncate_tail(path: &Path, bytes: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    file.set_len(len.saturating_sub(bytes))?;
    file.sync_all()
}

/// Appends raw bytes to a file, as a write cut short by a crash leaves them.
pub fn append_garbage(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
