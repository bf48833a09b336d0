//! Frame encoding and routing test vectors.
//!
//! These vectors pin the on-disk record frame and the key hash, so other
//! implementations reading Tidelog segments can check themselves against
//! the same bytes. They serialize to JSON for sharing.

use serde::{Deserialize, Serialize};

/// An encoded record frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Record offset.
    pub offset: u64,
    /// Record timestamp in milliseconds.
    pub timestamp: i64,
    /// Key (hex-encoded), absent for keyless records.
    pub key_hex: Option<String>,
    /// Value (hex-encoded).
    pub value_hex: String,
    /// Complete frame (hex-encoded).
    pub frame_hex: String,
}

/// A murmur2 hash and the partitions it selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingVector {
    /// Key (UTF-8).
    pub key: String,
    /// Unsigned murmur2 hash of the key bytes.
    pub hash: u32,
    /// Partition among three.
    pub partition_of_3: u32,
    /// Partition among eight.
    pub partition_of_8: u32,
}

/// A frame that must fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidFrameVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Frame bytes (hex-encoded).
    pub frame_hex: String,
    /// Whether the failure is a checksum mismatch rather than bad framing.
    pub checksum_failure: bool,
}

/// Record frame vectors.
pub fn frame_vectors() -> Vec<FrameVector> {
    vec![
        FrameVector {
            id: "frame_empty".into(),
            description: "Keyless record with an empty value at offset 0".into(),
            offset: 0,
            timestamp: 0,
            key_hex: None,
            value_hex: String::new(),
            frame_hex: "18000000000000000000000000000000000000000000000000000000".into(),
        },
        FrameVector {
            id: "frame_keyless".into(),
            description: "Keyless record 'hello'".into(),
            offset: 0,
            timestamp: 1_700_000_000_000,
            key_hex: None,
            value_hex: "68656c6c6f".into(),
            frame_hex: "1d00000086a6103600000000000000000068e5cf8b0100000000000068656c6c6f"
                .into(),
        },
        FrameVector {
            id: "frame_keyed".into(),
            description: "Keyed record user-1 => {\"n\":1} at offset 42".into(),
            offset: 42,
            timestamp: 1_700_000_000_123,
            key_hex: Some("757365722d31".into()),
            value_hex: "7b226e223a317d".into(),
            frame_hex: "25000000d967ba5b2a000000000000007b68e5cf8b01000006000000757365722d317b226e223a317d"
                .into(),
        },
        FrameVector {
            id: "frame_tombstone".into(),
            description: "Tombstone for key 'k' with a negative timestamp".into(),
            offset: 7,
            timestamp: -1,
            key_hex: Some("6b".into()),
            value_hex: String::new(),
            frame_hex: "190000005d5762080700000000000000ffffffffffffffff010000006b".into(),
        },
    ]
}

/// Frames that decoders must reject.
pub fn invalid_frame_vectors() -> Vec<InvalidFrameVector> {
    vec![
        InvalidFrameVector {
            id: "short_header".into(),
            description: "Fewer bytes than a frame header".into(),
            frame_hex: "1800000000000000".into(),
            checksum_failure: false,
        },
        InvalidFrameVector {
            id: "length_too_small".into(),
            description: "Length field smaller than the fixed header".into(),
            frame_hex: "10000000000000000000000000000000000000000000000000000000".into(),
            checksum_failure: false,
        },
        InvalidFrameVector {
            id: "key_past_body".into(),
            description: "Key length larger than the body".into(),
            frame_hex: "18000000000000000000000000000000000000000000000001000000".into(),
            checksum_failure: false,
        },
        InvalidFrameVector {
            id: "truncated_value".into(),
            description: "Frame shorter than its length field".into(),
            frame_hex: "1d00000086a6103600000000000000000068e5cf8b0100000000000068656c".into(),
            checksum_failure: false,
        },
        InvalidFrameVector {
            id: "flipped_value".into(),
            description: "Value 'hellp' under the checksum of 'hello'".into(),
            frame_hex: "1d00000086a6103600000000000000000068e5cf8b0100000000000068656c6c70"
                .into(),
            checksum_failure: true,
        },
    ]
}

/// Key routing vectors, matching the Kafka Java client.
pub fn routing_vectors() -> Vec<RoutingVector> {
    [
        ("", 275_646_681, 0, 1),
        ("21", 3_321_034_988, 0, 4),
        ("hello", 2_132_663_229, 0, 5),
        ("kafka", 3_496_464_228, 1, 4),
        ("user-123", 2_826_711_316, 2, 4),
        ("order-42", 501_153_024, 0, 0),
    ]
    .into_iter()
    .map(|(key, hash, partition_of_3, partition_of_8)| RoutingVector {
        key: key.into(),
        hash,
        partition_of_3,
        partition_of_8,
    })
    .collect()
}

/// All vectors, grouped for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSet {
    /// Valid frames.
    pub frames: Vec<FrameVector>,
    /// Invalid frames.
    pub invalid_frames: Vec<InvalidFrameVector>,
    /// Routing hashes.
    pub routing: Vec<RoutingVector>,
}

/// Returns every vector.
pub fn all_vectors() -> VectorSet {
    VectorSet {
        frames: frame_vectors(),
        invalid_frames: invalid_frame_vectors(),
        routing: routing_vectors(),
    }
}

/// Serializes every vector to pretty JSON.
pub fn export_vectors_json() -> String {
    serde_json::to_string_pretty(&all_vectors()).unwrap_or_default()
}

/// Parses vectors exported by [`export_vectors_json`].
pub fn import_vectors_json(json: &str) -> serde_json::Result<VectorSet> {
    serde_json::from_str(json)
}

/// Decodes a hex string.
pub fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("odd-length hex string".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("invalid hex at {i}: {e}"))
        })
        .collect()
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tidelog_core::{murmur2, CoreError, PartitionId, Record, Router};

    fn bytes_of(hex: &str) -> Bytes {
        Bytes::from(hex_decode(hex).unwrap())
    }

    #[test]
    fn frames_encode_to_vectors() {
        for v in frame_vectors() {
            let record = Record::new(
                v.offset,
                v.timestamp,
                v.key_hex.as_deref().map(bytes_of),
                bytes_of(&v.value_hex),
            );
            assert_eq!(hex_encode(&record.encode()), v.frame_hex, "vector {}", v.id);
        }
    }

    #[test]
    fn vectors_decode_to_records() {
        for v in frame_vectors() {
            let record = Record::decode(&hex_decode(&v.frame_hex).unwrap()).unwrap();
            assert_eq!(record.offset, v.offset, "vector {}", v.id);
            assert_eq!(record.timestamp, v.timestamp, "vector {}", v.id);
            assert_eq!(record.key.as_deref().map(hex_encode), v.key_hex, "vector {}", v.id);
            assert_eq!(hex_encode(&record.value), v.value_hex, "vector {}", v.id);
        }
    }

    #[test]
    fn invalid_frames_are_rejected() {
        for v in invalid_frame_vectors() {
            let err = Record::decode(&hex_decode(&v.frame_hex).unwrap()).unwrap_err();
            assert_eq!(
                matches!(err, CoreError::CorruptRecord { .. }),
                v.checksum_failure,
                "vector {}: {err}",
                v.id
            );
        }
    }

    #[test]
    fn routing_matches_vectors() {
        let three = Router::new(3);
        let eight = Router::new(8);
        for v in routing_vectors() {
            assert_eq!(murmur2(v.key.as_bytes()), v.hash, "key {:?}", v.key);
            if !v.key.is_empty() {
                assert_eq!(
                    three.partition_for_key(v.key.as_bytes()),
                    PartitionId::new(v.partition_of_3)
                );
                assert_eq!(
                    eight.partition_for_key(v.key.as_bytes()),
                    PartitionId::new(v.partition_of_8)
                );
            }
        }
    }

    #[test]
    fn json_export_roundtrips() {
        let json = export_vectors_json();
        assert!(json.contains("frame_tombstone"));
        assert_eq!(import_vectors_json(&json).unwrap(), all_vectors());
    }

    #[test]
    fn hex_rejects_odd_input() {
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
        assert_eq!(hex_decode("00ff").unwrap(), vec![0x00, 0xff]);
    }
}
