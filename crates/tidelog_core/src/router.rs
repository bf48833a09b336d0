//! Record-to-partition routing.
//!
//! Keyed records go to `murmur2(key) % partitions`, the same assignment the
//! Kafka Java client uses, so a key always lands on the same partition and
//! its records stay ordered. Keyless records are spread round-robin.

use crate::types::PartitionId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Kafka-compatible murmur2 hash (seed `0x9747b28c`).
#[must_use]
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h: u32 = SEED ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Chooses a partition for each appended record.
#[derive(Debug)]
pub struct Router {
    partitions: u32,
    next: AtomicU32,
}

impl Router {
    /// Creates a router over `partitions` partitions.
    ///
    /// # Panics
    ///
    /// Panics if `partitions` is zero; topics validate this before building a router.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        assert!(partitions > 0, "router needs at least one partition");
        Self {
            partitions,
            next: AtomicU32::new(0),
        }
    }

    /// Number of partitions routed over.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    /// Returns the partition for a record with the given key.
    ///
    /// Empty keys count as no key.
    pub fn route(&self, key: Option<&[u8]>) -> PartitionId {
        match key.filter(|k| !k.is_empty()) {
            Some(key) => self.partition_for_key(key),
            None => PartitionId::new(self.next.fetch_add(1, Ordering::Relaxed) % self.partitions),
        }
    }

    /// Returns the partition a key always maps to.
    #[must_use]
    pub fn partition_for_key(&self, key: &[u8]) -> PartitionId {
        PartitionId::new((murmur2(key) & 0x7fff_ffff) % self.partitions)
    }
}
