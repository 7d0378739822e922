//! # Type & Field Policies
//!
//! The externally supplied behavior surface:
//! - per-type key-field declarations, or a global whole-object key
//!   function, consumed by identity resolution;
//! - per-field `merge` functions, consulted on write;
//! - per-field `read` functions, consulted on read.
//!
//! Pluggable behavior is a capability lookup table keyed by
//! (typename, field name) and resolved at write/read time, with no
//! subclassing, no registration order sensitivity (`BTreeMap`).

use crate::keys;
use crate::store::StoreView;
use crate::types::{DepSet, EntityKey, StoredValue};
use crate::selection::VariableValues;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// POLICY FUNCTION TYPES
// =============================================================================

/// Whole-object key function: returns the entity key string for an
/// object, or `None` to fall through to declared/default identity rules.
pub type KeyOfFn = Box<dyn Fn(&Map<String, Value>) -> Option<String>>;

/// Per-field merge function: combines the existing stored value (if any)
/// with the incoming one. The returned value is what gets stored.
pub type MergeFn =
    Box<dyn Fn(Option<&StoredValue>, StoredValue, &mut MergeContext<'_>) -> StoredValue>;

/// Per-field read function: derives the value returned for a field from
/// the stored value (if any). Returning `None` reports the field missing.
pub type ReadFn = Box<dyn Fn(Option<&StoredValue>, &mut ReadContext<'_>) -> Option<StoredValue>>;

// =============================================================================
// TYPE POLICIES
// =============================================================================

/// The full policy configuration for one cache instance.
#[derive(Default)]
pub struct TypePolicies {
    key_of: Option<KeyOfFn>,
    key_fields: BTreeMap<String, Vec<String>>,
    merge_fns: BTreeMap<(String, String), MergeFn>,
    read_fns: BTreeMap<(String, String), ReadFn>,
}

impl TypePolicies {
    /// Create an empty policy set (built-in identity fallback only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a global whole-object key function.
    pub fn set_key_of(
        &mut self,
        key_of: impl Fn(&Map<String, Value>) -> Option<String> + 'static,
    ) {
        self.key_of = Some(Box::new(key_of));
    }

    /// Declare the key fields for a type.
    pub fn declare_key_fields(&mut self, type_name: impl Into<String>, fields: &[&str]) {
        self.key_fields.insert(
            type_name.into(),
            fields.iter().map(|f| (*f).to_string()).collect(),
        );
    }

    /// Install a merge function for one (type, field) pair.
    pub fn set_merge(
        &mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        merge: impl Fn(Option<&StoredValue>, StoredValue, &mut MergeContext<'_>) -> StoredValue
        + 'static,
    ) {
        self.merge_fns
            .insert((type_name.into(), field.into()), Box::new(merge));
    }

    /// Install a read function for one (type, field) pair.
    pub fn set_read(
        &mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        read: impl Fn(Option<&StoredValue>, &mut ReadContext<'_>) -> Option<StoredValue> + 'static,
    ) {
        self.read_fns
            .insert((type_name.into(), field.into()), Box::new(read));
    }

    /// The configured whole-object key function, if any.
    #[must_use]
    pub fn key_of(&self) -> Option<&KeyOfFn> {
        self.key_of.as_ref()
    }

    /// Declared key fields for a type, if any.
    #[must_use]
    pub fn key_fields_for(&self, type_name: &str) -> Option<&[String]> {
        self.key_fields.get(type_name).map(Vec::as_slice)
    }

    /// The merge function for a (type, field) pair, if any.
    #[must_use]
    pub fn merge_for(&self, type_name: &str, field: &str) -> Option<&MergeFn> {
        self.merge_fns
            .get(&(type_name.to_string(), field.to_string()))
    }

    /// The read function for a (type, field) pair, if any.
    #[must_use]
    pub fn read_for(&self, type_name: &str, field: &str) -> Option<&ReadFn> {
        self.read_fns
            .get(&(type_name.to_string(), field.to_string()))
    }
}

impl fmt::Debug for TypePolicies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePolicies")
            .field("key_of", &self.key_of.is_some())
            .field("key_fields", &self.key_fields)
            .field("merge_fns", &self.merge_fns.len())
            .field("read_fns", &self.read_fns.len())
            .finish()
    }
}

// =============================================================================
// DEEP MERGE HELPER
// =============================================================================

/// Deep-merge two stored values, honoring nested identity.
///
/// References to the same entity stay a single reference (the entity
/// records themselves were already merged); inline objects merge
/// field-wise with incoming winning per field; everything else is
/// replaced by the incoming value.
#[must_use]
pub fn merge_objects(existing: &StoredValue, incoming: &StoredValue) -> StoredValue {
    match (existing, incoming) {
        (StoredValue::Ref(a), StoredValue::Ref(b)) if a == b => StoredValue::Ref(a.clone()),
        (StoredValue::Object(a), StoredValue::Object(b)) => {
            let mut merged = a.clone();
            for (key, value) in b {
                let next = match a.get(key) {
                    Some(prev) => merge_objects(prev, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            StoredValue::Object(merged)
        }
        _ => incoming.clone(),
    }
}

// =============================================================================
// POLICY CONTEXTS
// =============================================================================

/// Context handed to merge functions.
pub struct MergeContext<'a> {
    /// The field's resolved arguments.
    pub args: &'a BTreeMap<String, Value>,
    /// The operation's resolved variable values.
    pub variables: &'a VariableValues,
}

impl MergeContext<'_> {
    /// Deep-merge helper honoring nested identity (see [`merge_objects`]).
    #[must_use]
    pub fn merge_objects(&self, existing: &StoredValue, incoming: &StoredValue) -> StoredValue {
        merge_objects(existing, incoming)
    }
}

/// Context handed to read functions.
///
/// Reads performed through this context (via [`ReadContext::read_field`])
/// register into the surrounding read's dependency set, so a derived
/// field re-evaluates when its inputs change.
pub struct ReadContext<'a> {
    /// The field's resolved arguments.
    pub args: &'a BTreeMap<String, Value>,
    /// The operation's resolved variable values.
    pub variables: &'a VariableValues,
    entity: &'a EntityKey,
    view: StoreView<'a>,
    policies: &'a TypePolicies,
    deps: &'a mut DepSet,
    record_deps: bool,
}

impl<'a> ReadContext<'a> {
    /// Build a read context (crate-internal; constructed by the read walk).
    pub(crate) fn new(
        args: &'a BTreeMap<String, Value>,
        variables: &'a VariableValues,
        entity: &'a EntityKey,
        view: StoreView<'a>,
        policies: &'a TypePolicies,
        deps: &'a mut DepSet,
        record_deps: bool,
    ) -> Self {
        Self {
            args,
            variables,
            entity,
            view,
            policies,
            deps,
            record_deps,
        }
    }

    /// Read a sibling field (no arguments) on the current entity.
    #[must_use]
    pub fn read_field(&mut self, name: &str) -> Option<StoredValue> {
        self.read_field_with(name, &BTreeMap::new())
    }

    /// Read a sibling field with resolved arguments on the current entity.
    #[must_use]
    pub fn read_field_with(
        &mut self,
        name: &str,
        args: &BTreeMap<String, Value>,
    ) -> Option<StoredValue> {
        let key = keys::field_key(name, args);
        if self.record_deps {
            self.deps.insert((self.entity.clone(), key.clone()));
        }
        self.view.lookup(self.entity, &key).cloned()
    }

    /// Compute the reference an object would normalize to, if it is
    /// identifiable under the current policies.
    #[must_use]
    pub fn to_reference(&self, object: &Map<String, Value>) -> Option<EntityKey> {
        keys::entity_key(object, self.policies).ok().flatten()
    }

    /// Deep-merge helper honoring nested identity (see [`merge_objects`]).
    #[must_use]
    pub fn merge_objects(&self, existing: &StoredValue, incoming: &StoredValue) -> StoredValue {
        merge_objects(existing, incoming)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_objects_unions_fields() {
        let existing = StoredValue::Object(
            [
                ("a".to_string(), StoredValue::Int(1)),
                ("b".to_string(), StoredValue::Int(2)),
            ]
            .into_iter()
            .collect(),
        );
        let incoming = StoredValue::Object(
            [
                ("b".to_string(), StoredValue::Int(20)),
                ("c".to_string(), StoredValue::Int(3)),
            ]
            .into_iter()
            .collect(),
        );

        let merged = merge_objects(&existing, &incoming);
        let map = match merged {
            StoredValue::Object(map) => map,
            _ => BTreeMap::new(),
        };
        assert_eq!(map.get("a"), Some(&StoredValue::Int(1)));
        assert_eq!(map.get("b"), Some(&StoredValue::Int(20)));
        assert_eq!(map.get("c"), Some(&StoredValue::Int(3)));
    }

    #[test]
    fn merge_objects_keeps_matching_reference() {
        let a = StoredValue::Ref(EntityKey::new("Item:1"));
        let b = StoredValue::Ref(EntityKey::new("Item:1"));
        assert_eq!(merge_objects(&a, &b), a);
    }

    #[test]
    fn merge_objects_replaces_mismatched_kinds() {
        let existing = StoredValue::Int(1);
        let incoming = StoredValue::String("two".to_string());
        assert_eq!(merge_objects(&existing, &incoming), incoming);
    }

    #[test]
    fn policy_lookup_is_per_type_and_field() {
        let mut policies = TypePolicies::new();
        policies.set_merge("Item", "tags", |_, incoming, _| incoming);

        assert!(policies.merge_for("Item", "tags").is_some());
        assert!(policies.merge_for("Item", "other").is_none());
        assert!(policies.merge_for("User", "tags").is_none());
    }
}
