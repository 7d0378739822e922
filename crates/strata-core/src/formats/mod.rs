//! # Formats Module
//!
//! Serialization formats for cache snapshots.
//!
//! The cache itself performs no I/O; these are pure byte-level
//! transformations consumed by the app layer.

pub mod persistence;

pub use persistence::{
    snapshot_from_bytes, snapshot_to_bytes, PersistenceHeader, FORMAT_VERSION, MAGIC_BYTES,
    MAX_PERSISTENCE_PAYLOAD_SIZE,
};
