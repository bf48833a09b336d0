//! Topic manifest.
//!
//! Each topic directory holds a `TOPIC` file recording the partition count
//! and the configuration the topic was created with:
//!
//! ```text
//! | magic "TLTP" (4) | version (2) | name_len (2) | name | partitions (4) | config | crc32 (4) |
//! ```

use crate::config::TopicConfig;
use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"TLTP";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Persistent description of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicManifest {
    /// Topic name.
    pub name: String,
    /// Fixed number of partitions.
    pub partitions: u32,
    /// Topic configuration.
    pub config: TopicConfig,
}

impl TopicManifest {
    /// Creates a new manifest.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: u32, config: TopicConfig) -> Self {
        Self {
            name: name.into(),
            partitions,
            config,
        }
    }

    /// Encodes the manifest to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.name.len());
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());

        let name = self.name.as_bytes();
        let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&name[..usize::from(name_len)]);
        buf.extend_from_slice(&self.partitions.to_le_bytes());

        let config = &self.config;
        buf.extend_from_slice(&config.segment_max_bytes.to_le_bytes());
        buf.extend_from_slice(&config.segment_max_records.to_le_bytes());
        buf.extend_from_slice(&config.index_interval.to_le_bytes());
        let batch = u32::try_from(config.batch_max_records).unwrap_or(u32::MAX);
        buf.extend_from_slice(&batch.to_le_bytes());
        buf.extend_from_slice(&duration_millis(config.batch_linger).to_le_bytes());
        put_optional(&mut buf, config.retention_max_age.map(duration_millis));
        put_optional(&mut buf, config.retention_max_bytes);
        buf.push(u8::from(config.compaction_enabled));
        buf.push(u8::from(config.sync_on_flush));

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a manifest from bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the magic, version, checksum or layout is wrong.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 || data[..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid topic manifest magic"));
        }
        let body = split_crc(data, "topic manifest")?;

        let mut reader = ByteReader::new(&body[4..], "topic manifest");
        let version = reader.u16()?;
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let name_len = usize::from(reader.u16()?);
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| CoreError::invalid_format("invalid topic name"))?
            .to_string();
        let partitions = reader.u32()?;

        let config = TopicConfig {
            segment_max_bytes: reader.u64()?,
            segment_max_records: reader.u64()?,
            index_interval: reader.u32()?,
            batch_max_records: reader.u32()? as usize,
            batch_linger: Duration::from_millis(reader.u64()?),
            retention_max_age: reader.optional()?.map(Duration::from_millis),
            retention_max_bytes: reader.optional()?,
            compaction_enabled: reader.u8()? != 0,
            sync_on_flush: reader.u8()? != 0,
        };
        reader.finish()?;

        Ok(Self {
            name,
            partitions,
            config,
        })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn put_optional(buf: &mut Vec<u8>, value: Option<u64>) {
    match value {
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        None => buf.push(0),
    }
}

/// Splits a trailing crc32 off `data` and verifies it.
pub(crate) fn split_crc<'a>(data: &'a [u8], what: &str) -> CoreResult<&'a [u8]> {
    if data.len() < 4 {
        return Err(CoreError::invalid_format(format!("{what} too short")));
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let mut raw = [0u8; 4];
    raw.copy_from_slice(tail);
    let stored = u32::from_le_bytes(raw);
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(CoreError::invalid_format(format!(
            "{what} checksum mismatch: expected {stored:08x}, got {actual:08x}"
        )));
    }
    Ok(body)
}

/// Little-endian cursor over a small metadata file.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    cursor: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            data,
            cursor: 0,
            what,
        }
    }

    pub fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.cursor.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(CoreError::invalid_format(format!("{} too short", self.what)));
        };
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> CoreResult<u16> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    pub fn u32(&mut self) -> CoreResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn u64(&mut self) -> CoreResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn optional(&mut self) -> CoreResult<Option<u64>> {
        match self.u8()? {
            0 => Ok(None),
            _ => self.u64().map(Some),
        }
    }

    /// Fails if unread bytes remain.
    pub fn finish(self) -> CoreResult<()> {
        if self.cursor != self.data.len() {
            return Err(CoreError::invalid_format(format!(
                "{} has {} trailing bytes",
                self.what,
                self.data.len() - self.cursor
            )));
        }
        Ok(())
    }
}
