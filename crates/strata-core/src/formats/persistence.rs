//! # Persistence Format
//!
//! Binary serialization for cache snapshots.
//!
//! Format: Header (5 bytes) + postcard-serialized snapshot data.
//! - 4 bytes: Magic ("STRA")
//! - 1 byte: Version
//!
//! Pre-deserialization validation keeps corrupted or hostile input from
//! turning into unbounded allocations: the payload size limit and the
//! header are checked before any payload parsing happens.

use crate::store::Snapshot;
use crate::types::CacheError;

/// Magic bytes for the binary snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"STRA";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the snapshot encoding.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum allowed payload size for the persistence format.
///
/// Validated BEFORE attempting deserialization, so a corrupted length
/// cannot drive memory exhaustion.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

/// Minimum valid data size (header only).
const MIN_FILE_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all snapshot data.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a new header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), CacheError> {
        if &self.magic != MAGIC_BYTES {
            return Err(CacheError::Deserialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(CacheError::Deserialization(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < MIN_FILE_SIZE {
            return Err(CacheError::Deserialization("Header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a snapshot to bytes (header + payload).
///
/// This is a pure transformation - no file I/O.
pub fn snapshot_to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>, CacheError> {
    let header = PersistenceHeader::new();
    let payload =
        postcard::to_stdvec(snapshot).map_err(|e| CacheError::Serialization(e.to_string()))?;

    let mut result = Vec::with_capacity(MIN_FILE_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);

    Ok(result)
}

/// Deserialize a snapshot from bytes.
///
/// Validates minimum size, maximum size and the header before touching
/// the payload.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<Snapshot, CacheError> {
    if bytes.len() < MIN_FILE_SIZE {
        return Err(CacheError::Deserialization(
            "Data too short: minimum 5 bytes required".to_string(),
        ));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(CacheError::Deserialization(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = &bytes[MIN_FILE_SIZE..];
    postcard::from_bytes(payload).map_err(|e| {
        CacheError::Deserialization(format!("Failed to deserialize snapshot data: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKey, FieldKey, StoreObject, StoredValue};

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        let mut record = StoreObject::new();
        record.insert(
            FieldKey::new("item"),
            StoredValue::Ref(EntityKey::new("Item:1")),
        );
        snapshot
            .entities
            .insert(EntityKey::new("ROOT_QUERY"), record);

        let mut item = StoreObject::new();
        item.insert(FieldKey::new("id"), StoredValue::Int(1));
        item.insert(
            FieldKey::new("text"),
            StoredValue::String("payload".to_string()),
        );
        snapshot.entities.insert(EntityKey::new("Item:1"), item);
        snapshot.extra_roots.insert(EntityKey::new("Item:1"));
        snapshot
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let bytes = header.to_bytes();
        let restored = PersistenceHeader::from_bytes(&bytes).expect("parse header");

        assert_eq!(restored.magic, *MAGIC_BYTES);
        assert_eq!(restored.version, FORMAT_VERSION);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let snapshot = sample_snapshot();

        let bytes1 = snapshot_to_bytes(&snapshot).expect("first serialize");
        let restored = snapshot_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = snapshot_to_bytes(&restored).expect("second serialize");

        assert_eq!(restored, snapshot);
        assert_eq!(
            bytes1, bytes2,
            "save -> load -> save must produce identical bytes"
        );
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");

        assert!(snapshot_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(snapshot_from_bytes(&[0u8; 3]).is_err());
    }

    #[test]
    fn wrong_version_rejected() {
        let snapshot = sample_snapshot();
        let mut bytes = snapshot_to_bytes(&snapshot).expect("serialize");
        bytes[4] = FORMAT_VERSION.wrapping_add(1);

        assert!(snapshot_from_bytes(&bytes).is_err());
    }
}
