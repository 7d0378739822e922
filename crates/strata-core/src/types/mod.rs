//! # Core Type Definitions
//!
//! This module contains the storage-level types for the Strata normalized
//! cache:
//! - Identity keys (`EntityKey`, `FieldKey`)
//! - Stored data representation (`StoredValue`, `StoreObject`)
//! - Change/dependency sets (`DirtySet`, `DepSet`)
//! - Error types (`CacheError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` where used as `BTreeMap`/`BTreeSet` keys
//! - Use `BTreeMap` exclusively for field and entity maps, so iteration
//!   order (and therefore serialization and broadcast order) is stable

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// ROOT KEYS
// =============================================================================

/// Synthetic entity key for the query operation root.
pub const ROOT_QUERY: &str = "ROOT_QUERY";

/// Synthetic entity key for the mutation operation root.
pub const ROOT_MUTATION: &str = "ROOT_MUTATION";

/// Synthetic entity key for the subscription operation root.
pub const ROOT_SUBSCRIPTION: &str = "ROOT_SUBSCRIPTION";

// =============================================================================
// ENTITY & FIELD IDENTIFIERS
// =============================================================================

/// Global identity string for a normalizable object.
///
/// Two response objects with the same `EntityKey` are the same logical
/// entity and are merged into one record, never duplicated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub String);

impl EntityKey {
    /// Create a new entity key from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The query operation root key.
    #[must_use]
    pub fn query_root() -> Self {
        Self::new(ROOT_QUERY)
    }

    /// The mutation operation root key.
    #[must_use]
    pub fn mutation_root() -> Self {
        Self::new(ROOT_MUTATION)
    }

    /// The subscription operation root key.
    #[must_use]
    pub fn subscription_root() -> Self {
        Self::new(ROOT_SUBSCRIPTION)
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key is one of the three operation roots.
    #[must_use]
    pub fn is_operation_root(&self) -> bool {
        matches!(self.0.as_str(), ROOT_QUERY | ROOT_MUTATION | ROOT_SUBSCRIPTION)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical field+arguments encoding used as a map key within an entity.
///
/// A field with no arguments stores under its bare name; a field with
/// arguments stores under `name({"arg":value,...})` with argument keys
/// sorted, so equal field+argument combinations always collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey(pub String);

impl FieldKey {
    /// Create a new field key from an already-encoded string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The field-name portion of the key (everything before the argument
    /// encoding, if any).
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self.0.find('(') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// STORED VALUES
// =============================================================================

/// A value stored under one field key of one entity record.
///
/// Identifiable children are always stored as [`StoredValue::Ref`]; inline
/// objects are only ever the non-identifiable remainder. The enum is
/// self-contained (no borrowed or foreign value types) so it serializes
/// through both postcard and JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Explicit JSON null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Order-preserving list of stored values.
    List(Vec<StoredValue>),
    /// Inline non-identifiable nested object (no separate identity).
    Object(BTreeMap<String, StoredValue>),
    /// A pointer to another entity record, resolved lazily at read time.
    Ref(EntityKey),
}

/// JSON property name used to tag serialized references in snapshots.
pub const REF_TAG: &str = "__ref";

impl StoredValue {
    /// Whether this value is a reference.
    #[must_use]
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// The referenced entity key, if this value is a reference.
    #[must_use]
    pub fn as_ref_key(&self) -> Option<&EntityKey> {
        match self {
            Self::Ref(key) => Some(key),
            _ => None,
        }
    }

    /// The string payload, if this value is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short kind label for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Ref(_) => "reference",
        }
    }

    /// Convert a JSON scalar/tree into a stored value structurally.
    ///
    /// This is the leaf-field conversion: it never produces references
    /// (normalization decisions belong to the write walk).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::from_number(n),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON number, preferring `Int` and falling back to `Float`
    /// for fractional values and magnitudes beyond `i64`.
    #[must_use]
    pub fn from_number(n: &serde_json::Number) -> Self {
        match n.as_i64() {
            Some(i) => Self::Int(i),
            None => Self::Float(n.as_f64().unwrap_or(0.0)),
        }
    }

    /// Render this value as plain JSON.
    ///
    /// References render in their tagged snapshot form
    /// (`{"__ref": "<key>"}`); the read walk resolves references before
    /// reaching this conversion, so tagged output only appears in
    /// snapshots and diagnostics.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Ref(key) => {
                let mut tagged = serde_json::Map::new();
                tagged.insert(REF_TAG.to_string(), serde_json::Value::String(key.0.clone()));
                serde_json::Value::Object(tagged)
            }
        }
    }

    /// Parse a JSON value in snapshot form back into a stored value.
    ///
    /// An object whose only property is `"__ref"` with a string value is
    /// decoded as a reference; everything else decodes structurally.
    #[must_use]
    pub fn from_snapshot_json(value: &serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = value {
            if map.len() == 1 {
                if let Some(serde_json::Value::String(key)) = map.get(REF_TAG) {
                    return Self::Ref(EntityKey::new(key.clone()));
                }
            }
            return Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_snapshot_json(v)))
                    .collect(),
            );
        }
        Self::from_json(value)
    }
}

// =============================================================================
// STORE OBJECT
// =============================================================================

/// One entity record: a mapping from field storage key to stored value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreObject {
    fields: BTreeMap<FieldKey, StoredValue>,
}

impl StoreObject {
    /// Create a new empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one field by storage key.
    #[must_use]
    pub fn get(&self, field: &FieldKey) -> Option<&StoredValue> {
        self.fields.get(field)
    }

    /// Store a field value. Returns the previous value, if any.
    pub fn insert(&mut self, field: FieldKey, value: StoredValue) -> Option<StoredValue> {
        self.fields.insert(field, value)
    }

    /// Remove one field by storage key.
    pub fn remove(&mut self, field: &FieldKey) -> Option<StoredValue> {
        self.fields.remove(field)
    }

    /// Remove every storage key whose field-name portion matches `name`
    /// (all argument variants). Returns the removed keys.
    pub fn remove_field_named(&mut self, name: &str) -> Vec<FieldKey> {
        let doomed: Vec<FieldKey> = self
            .fields
            .keys()
            .filter(|k| k.field_name() == name)
            .cloned()
            .collect();
        for key in &doomed {
            self.fields.remove(key);
        }
        doomed
    }

    /// Whether the record has a value for the given storage key.
    #[must_use]
    pub fn contains(&self, field: &FieldKey) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterate fields in deterministic (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &StoredValue)> {
        self.fields.iter()
    }

    /// Number of stored fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(FieldKey, StoredValue)> for StoreObject {
    fn from_iter<T: IntoIterator<Item = (FieldKey, StoredValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// CHANGE & DEPENDENCY SETS
// =============================================================================

/// The (entity, field) pairs whose stored value actually changed as a
/// result of a write. Idempotent writes produce an empty set.
pub type DirtySet = BTreeSet<(EntityKey, FieldKey)>;

/// The (entity, field) pairs consulted while producing a read result,
/// used to decide whether a later write affects that result.
pub type DepSet = BTreeSet<(EntityKey, FieldKey)>;

/// External variable bindings for one operation, keyed by variable name.
pub type Variables = BTreeMap<String, serde_json::Value>;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the cache.
///
/// Completeness gaps (missing fields, dangling references) are never
/// errors; they are reported as data in the read result. Errors are
/// reserved for malformed input that must be rejected wholesale.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A fragment document did not contain exactly one fragment and no
    /// fragment name was given to disambiguate.
    #[error("Found {found} fragments. A fragment name must be provided when a document does not contain exactly 1 fragment")]
    InvalidFragment {
        /// How many fragments the document contained.
        found: usize,
    },

    /// A named fragment could not be resolved from the document or the
    /// configured fragment registry.
    #[error("No fragment named '{name}' found in document or registry")]
    FragmentNotFound {
        /// The unresolvable fragment name.
        name: String,
    },

    /// A declared key field was absent on an object of its type.
    #[error("Missing key field '{field}' while computing the key for an object of type '{type_name}'")]
    KeyFieldMissing {
        /// The object's `__typename`.
        type_name: String,
        /// The declared key field that was absent.
        field: String,
    },

    /// Written data was shaped incompatibly with the selection it was
    /// written against (e.g. a non-object at an object position's root).
    #[error("Data shape error: {0}")]
    DataShape(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// An I/O error occurred (file-level tooling only; the cache itself
    /// performs no I/O).
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================
