//! # strata-core
//!
//! The normalized object cache for Strata - THE LOGIC.
//!
//! This crate stores response data as normalized entity records, answers
//! structured read queries against them, tracks which live queries a
//! write affects, and supports speculative (optimistic) layers that roll
//! back cleanly in any order.
//!
//! ## Architectural Constraints
//!
//! The cache core:
//! - Is single-threaded and cooperative: every operation is synchronous
//!   and atomic with respect to every other; there are no locks
//! - Is deterministic: `BTreeMap`/`BTreeSet` everywhere, so iteration,
//!   serialization and broadcast order are stable
//! - Owns all mutation: stored records can only change through `Cache`
//!   entry points; no external in-place mutation is representable
//! - Performs no I/O and has no async or network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod formats;
pub mod fragments;
pub mod gc;
pub mod keys;
pub mod policies;
pub mod read;
pub mod selection;
pub mod store;
pub mod types;
pub mod watch;
pub mod write;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CacheError, DepSet, DirtySet, EntityKey, FieldKey, StoreObject, StoredValue, Variables,
    REF_TAG, ROOT_MUTATION, ROOT_QUERY, ROOT_SUBSCRIPTION,
};

// =============================================================================
// RE-EXPORTS: Cache Engine
// =============================================================================

pub use cache::Cache;
pub use fragments::FragmentRegistry;
pub use gc::GarbageCollector;
pub use keys::{entity_key, field_key, storage_key};
pub use policies::{merge_objects, MergeContext, ReadContext, TypePolicies};
pub use read::{MissingField, ReadResult, Reader};
pub use selection::{
    ArgValue, Directive, Document, Field, Fragment, Selection, SelectionSet, VariableValues,
};
pub use store::{Layer, LayeredStore, Snapshot, StoreView};
pub use watch::{WatchCallback, WatchHandle};
pub use write::Writer;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{
    snapshot_from_bytes, snapshot_to_bytes, PersistenceHeader, FORMAT_VERSION, MAGIC_BYTES,
    MAX_PERSISTENCE_PAYLOAD_SIZE,
};
