//! # Layered Store
//!
//! The entity storage: a durable base map plus a stack of named sparse
//! optimistic layers.
//!
//! Layers are ordered bottom-to-top. Lookup walks from the top layer
//! toward base and returns the first definition of the exact
//! (entity, field) key; a layer with no entry for that key is
//! transparent for it even when it overrides sibling fields of the same
//! entity. Removing a layer from any position is a splice: the layers
//! above keep their own sparse diffs and now resolve through the removed
//! layer's parent, which restores reads to the exact pre-layer state.

use crate::types::{DirtySet, EntityKey, FieldKey, StoreObject, StoredValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// LAYERS
// =============================================================================

/// One named optimistic layer: a sparse per-entity field diff.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    id: String,
    entities: BTreeMap<EntityKey, StoreObject>,
}

impl Layer {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entities: BTreeMap::new(),
        }
    }

    /// The layer's name (typically a mutation id).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Every (entity, field) pair this layer overrides.
    #[must_use]
    pub fn dirty_pairs(&self) -> DirtySet {
        let mut pairs = DirtySet::new();
        for (entity, record) in &self.entities {
            for (field, _) in record.iter() {
                pairs.insert((entity.clone(), field.clone()));
            }
        }
        pairs
    }

    fn get(&self, entity: &EntityKey, field: &FieldKey) -> Option<&StoredValue> {
        self.entities.get(entity).and_then(|record| record.get(field))
    }
}

// =============================================================================
// LAYERED STORE
// =============================================================================

/// The base entity map plus the ordered stack of optimistic layers and
/// the set of explicitly retained root ids.
#[derive(Debug, Default)]
pub struct LayeredStore {
    base: BTreeMap<EntityKey, StoreObject>,
    layers: Vec<Layer>,
    extra_roots: BTreeSet<EntityKey>,
}

impl LayeredStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // LAYER MANAGEMENT
    // =========================================================================

    /// Add a new empty layer on top of the stack.
    pub fn push_layer(&mut self, id: impl Into<String>) {
        self.layers.push(Layer::new(id));
    }

    /// Remove every layer with the given id, from wherever it sits in the
    /// stack. Returns the removed layers (bottom-to-top order); empty if
    /// no layer matched.
    pub fn pop_layer(&mut self, id: &str) -> Vec<Layer> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.layers.len());
        for layer in self.layers.drain(..) {
            if layer.id == id {
                removed.push(layer);
            } else {
                kept.push(layer);
            }
        }
        self.layers = kept;
        removed
    }

    /// Whether any layer with the given id exists.
    #[must_use]
    pub fn has_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.id == id)
    }

    /// Whether any optimistic layer is active.
    #[must_use]
    pub fn has_layers(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Number of active layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Resolve one (entity, field) key: top layer toward base when
    /// `optimistic`, base only otherwise.
    #[must_use]
    pub fn lookup(
        &self,
        entity: &EntityKey,
        field: &FieldKey,
        optimistic: bool,
    ) -> Option<&StoredValue> {
        if optimistic {
            for layer in self.layers.iter().rev() {
                if let Some(value) = layer.get(entity, field) {
                    return Some(value);
                }
            }
        }
        self.base.get(entity).and_then(|record| record.get(field))
    }

    /// Resolve one key as observed *at* a target layer: from the topmost
    /// layer with that id downward, then base. `None` targets base only.
    #[must_use]
    pub fn lookup_at(
        &self,
        layer_id: Option<&str>,
        entity: &EntityKey,
        field: &FieldKey,
    ) -> Option<&StoredValue> {
        if let Some(id) = layer_id {
            let top = self.layers.iter().rposition(|l| l.id == id);
            if let Some(top) = top {
                for layer in self.layers[..=top].iter().rev() {
                    if let Some(value) = layer.get(entity, field) {
                        return Some(value);
                    }
                }
            }
        }
        self.base.get(entity).and_then(|record| record.get(field))
    }

    /// Whether an entity record exists in base or (when `optimistic`)
    /// any layer.
    #[must_use]
    pub fn contains_entity(&self, entity: &EntityKey, optimistic: bool) -> bool {
        if optimistic && self.layers.iter().any(|l| l.entities.contains_key(entity)) {
            return true;
        }
        self.base.contains_key(entity)
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Store one field value into base or into the topmost layer with the
    /// given id (creating that layer if absent).
    ///
    /// Returns whether the observable value at the target actually
    /// changed; equal writes store nothing and stay out of the dirty set.
    pub fn put(
        &mut self,
        layer_id: Option<&str>,
        entity: &EntityKey,
        field: FieldKey,
        value: StoredValue,
    ) -> bool {
        if self.lookup_at(layer_id, entity, &field) == Some(&value) {
            return false;
        }
        let target = match layer_id {
            Some(id) => {
                if !self.has_layer(id) {
                    self.push_layer(id);
                }
                match self.layers.iter().rposition(|l| l.id == id) {
                    Some(idx) => &mut self.layers[idx].entities,
                    None => &mut self.base,
                }
            }
            None => &mut self.base,
        };
        target.entry(entity.clone()).or_default().insert(field, value);
        true
    }

    // =========================================================================
    // EVICTION (base layer only)
    // =========================================================================

    /// Remove a whole entity record from base. Returns the removed record.
    pub(crate) fn evict_entity(&mut self, entity: &EntityKey) -> Option<StoreObject> {
        self.extra_roots.remove(entity);
        self.base.remove(entity)
    }

    /// Remove every storage key of the named field (all argument
    /// variants) from an entity's base record. Returns the removed keys.
    pub(crate) fn evict_field(&mut self, entity: &EntityKey, name: &str) -> Vec<FieldKey> {
        match self.base.get_mut(entity) {
            Some(record) => record.remove_field_named(name),
            None => Vec::new(),
        }
    }

    // =========================================================================
    // EXTRA ROOTS
    // =========================================================================

    /// Retain an entity id as a GC root until released or evicted.
    pub fn retain(&mut self, entity: EntityKey) {
        if !entity.is_operation_root() {
            self.extra_roots.insert(entity);
        }
    }

    /// Release a previously retained entity id. Returns whether it was
    /// retained.
    pub fn release(&mut self, entity: &EntityKey) -> bool {
        self.extra_roots.remove(entity)
    }

    /// The currently retained extra root ids.
    #[must_use]
    pub fn extra_roots(&self) -> &BTreeSet<EntityKey> {
        &self.extra_roots
    }

    // =========================================================================
    // BASE ACCESS (GC, snapshots)
    // =========================================================================

    /// The base entity map (no layers applied).
    #[must_use]
    pub(crate) fn base(&self) -> &BTreeMap<EntityKey, StoreObject> {
        &self.base
    }

    /// Delete every base entity not present in `marked`. Returns how many
    /// records were removed.
    pub(crate) fn sweep(&mut self, marked: &BTreeSet<EntityKey>) -> usize {
        let before = self.base.len();
        self.base.retain(|key, _| marked.contains(key));
        before - self.base.len()
    }

    /// Number of base entity records.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.base.len()
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Snapshot the full base store plus the extra-root list. Layers are
    /// volatile and never captured.
    #[must_use]
    pub fn extract(&self) -> Snapshot {
        Snapshot {
            entities: self.base.clone(),
            extra_roots: self.extra_roots.clone(),
        }
    }

    /// Replace the store's contents with a snapshot. Any active layers
    /// are discarded (a snapshot is a complete durable state).
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.base = snapshot.entities;
        self.extra_roots = snapshot.extra_roots;
        self.layers.clear();
    }
}

// =============================================================================
// STORE VIEW
// =============================================================================

/// A read-only view of the store at a chosen optimism level, used by the
/// read walk and by read-policy contexts.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    store: &'a LayeredStore,
    optimistic: bool,
}

impl<'a> StoreView<'a> {
    /// Create a view over a store.
    #[must_use]
    pub fn new(store: &'a LayeredStore, optimistic: bool) -> Self {
        Self { store, optimistic }
    }

    /// Resolve one (entity, field) key through this view.
    #[must_use]
    pub fn lookup(&self, entity: &EntityKey, field: &FieldKey) -> Option<&'a StoredValue> {
        self.store.lookup(entity, field, self.optimistic)
    }

    /// Whether an entity record exists in this view.
    #[must_use]
    pub fn contains(&self, entity: &EntityKey) -> bool {
        self.store.contains_entity(entity, self.optimistic)
    }

    /// The entity's stored `__typename`, when present.
    #[must_use]
    pub fn typename_of(&self, entity: &EntityKey) -> Option<&'a str> {
        self.lookup(entity, &FieldKey::new("__typename"))
            .and_then(StoredValue::as_str)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// JSON property carrying snapshot metadata.
const META_TAG: &str = "__META";

/// JSON property listing extra root ids inside the metadata entry.
const EXTRA_ROOTS_TAG: &str = "extraRootIds";

/// A complete durable state of the store: every base entity record plus
/// the extra-root id list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Base entity records.
    pub entities: BTreeMap<EntityKey, StoreObject>,
    /// Retained root ids not necessarily reachable from `ROOT_QUERY`.
    pub extra_roots: BTreeSet<EntityKey>,
}

impl Snapshot {
    /// Render the snapshot as plain JSON: one property per entity, with
    /// references in their tagged `{"__ref": key}` form, plus a
    /// `__META.extraRootIds` entry.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        if !self.extra_roots.is_empty() {
            let ids: Vec<Value> = self
                .extra_roots
                .iter()
                .map(|k| Value::String(k.as_str().to_string()))
                .collect();
            let mut meta = Map::new();
            meta.insert(EXTRA_ROOTS_TAG.to_string(), Value::Array(ids));
            root.insert(META_TAG.to_string(), Value::Object(meta));
        }
        for (entity, record) in &self.entities {
            let mut fields = Map::new();
            for (field, value) in record.iter() {
                fields.insert(field.as_str().to_string(), value.to_json());
            }
            root.insert(entity.as_str().to_string(), Value::Object(fields));
        }
        Value::Object(root)
    }

    /// Parse a snapshot from its JSON rendering.
    ///
    /// Returns `None` when the value is not an object; unknown metadata
    /// is ignored.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let root = value.as_object()?;
        let mut snapshot = Self::default();
        for (key, entry) in root {
            if key == META_TAG {
                if let Some(ids) = entry.get(EXTRA_ROOTS_TAG).and_then(Value::as_array) {
                    for id in ids {
                        if let Some(id) = id.as_str() {
                            snapshot.extra_roots.insert(EntityKey::new(id));
                        }
                    }
                }
                continue;
            }
            let fields = entry.as_object()?;
            let record: StoreObject = fields
                .iter()
                .map(|(name, v)| (FieldKey::new(name.clone()), StoredValue::from_snapshot_json(v)))
                .collect();
            snapshot.entities.insert(EntityKey::new(key.clone()), record);
        }
        Some(snapshot)
    }

    /// Every reference key that occurs anywhere in the snapshot (used by
    /// integrity tooling; `__ref` occurrences inside stored values).
    #[must_use]
    pub fn referenced_keys(&self) -> BTreeSet<EntityKey> {
        let mut keys = BTreeSet::new();
        for record in self.entities.values() {
            for (_, value) in record.iter() {
                collect_refs(value, &mut keys);
            }
        }
        keys
    }
}

/// Collect every entity key referenced (transitively through lists and
/// inline objects) by a stored value.
pub(crate) fn collect_refs(value: &StoredValue, out: &mut BTreeSet<EntityKey>) {
    match value {
        StoredValue::Ref(key) => {
            out.insert(key.clone());
        }
        StoredValue::List(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        StoredValue::Object(map) => {
            for item in map.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::REF_TAG;

    fn key(s: &str) -> EntityKey {
        EntityKey::new(s)
    }

    fn field(s: &str) -> FieldKey {
        FieldKey::new(s)
    }

    #[test]
    fn base_put_and_lookup() {
        let mut store = LayeredStore::new();
        let changed = store.put(None, &key("Item:1"), field("text"), StoredValue::Int(1));
        assert!(changed);
        assert_eq!(
            store.lookup(&key("Item:1"), &field("text"), true),
            Some(&StoredValue::Int(1))
        );
    }

    #[test]
    fn equal_write_is_not_a_change() {
        let mut store = LayeredStore::new();
        assert!(store.put(None, &key("Item:1"), field("text"), StoredValue::Int(1)));
        assert!(!store.put(None, &key("Item:1"), field("text"), StoredValue::Int(1)));
    }

    #[test]
    fn layer_overrides_per_field() {
        let mut store = LayeredStore::new();
        store.put(None, &key("Item:1"), field("a"), StoredValue::Int(1));
        store.put(None, &key("Item:1"), field("b"), StoredValue::Int(2));
        store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(10));

        // Overridden field resolves through the layer...
        assert_eq!(
            store.lookup(&key("Item:1"), &field("a"), true),
            Some(&StoredValue::Int(10))
        );
        // ...while the sibling falls through to base.
        assert_eq!(
            store.lookup(&key("Item:1"), &field("b"), true),
            Some(&StoredValue::Int(2))
        );
        // Base-only lookup ignores the layer entirely.
        assert_eq!(
            store.lookup(&key("Item:1"), &field("a"), false),
            Some(&StoredValue::Int(1))
        );
    }

    #[test]
    fn pop_layer_restores_prior_state() {
        let mut store = LayeredStore::new();
        store.put(None, &key("Item:1"), field("a"), StoredValue::Int(1));
        store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(10));

        let removed = store.pop_layer("m1");
        assert_eq!(removed.len(), 1);
        assert_eq!(
            store.lookup(&key("Item:1"), &field("a"), true),
            Some(&StoredValue::Int(1))
        );
        assert!(!store.has_layers());
    }

    #[test]
    fn middle_layer_removal_is_a_splice() {
        let mut store = LayeredStore::new();
        store.put(None, &key("Item:1"), field("a"), StoredValue::Int(1));
        store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(10));
        store.put(Some("m2"), &key("Item:1"), field("b"), StoredValue::Int(20));

        // Remove the lower layer; the upper layer's diff must survive.
        store.pop_layer("m1");
        assert_eq!(
            store.lookup(&key("Item:1"), &field("a"), true),
            Some(&StoredValue::Int(1))
        );
        assert_eq!(
            store.lookup(&key("Item:1"), &field("b"), true),
            Some(&StoredValue::Int(20))
        );
        assert_eq!(store.layer_count(), 1);
    }

    #[test]
    fn layered_write_equal_to_base_is_transparent() {
        let mut store = LayeredStore::new();
        store.put(None, &key("Item:1"), field("a"), StoredValue::Int(1));

        // Writing the base value into a layer changes nothing observable,
        // and no layer entry is created for it.
        assert!(!store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(1)));
        assert!(!store.has_layer("m1"));
    }

    #[test]
    fn lookup_at_observes_layers_below_target() {
        let mut store = LayeredStore::new();
        store.put(None, &key("Item:1"), field("a"), StoredValue::Int(1));
        store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(10));
        store.push_layer("m2");

        assert_eq!(
            store.lookup_at(Some("m2"), &key("Item:1"), &field("a")),
            Some(&StoredValue::Int(10))
        );
        assert_eq!(
            store.lookup_at(None, &key("Item:1"), &field("a")),
            Some(&StoredValue::Int(1))
        );
    }

    #[test]
    fn retain_ignores_operation_roots() {
        let mut store = LayeredStore::new();
        store.retain(EntityKey::query_root());
        store.retain(key("Item:1"));
        assert_eq!(store.extra_roots().len(), 1);
    }

    #[test]
    fn snapshot_roundtrip_via_json() {
        let mut store = LayeredStore::new();
        store.put(
            None,
            &key("ROOT_QUERY"),
            field("item"),
            StoredValue::Ref(key("Item:1")),
        );
        store.put(None, &key("Item:1"), field("text"), StoredValue::String("hi".into()));
        store.retain(key("Item:1"));

        let snapshot = store.extract();
        let json = snapshot.to_json();
        assert_eq!(json["ROOT_QUERY"]["item"][REF_TAG], "Item:1");

        let parsed = Snapshot::from_json(&json).expect("parse");
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn restore_discards_layers() {
        let mut store = LayeredStore::new();
        store.put(Some("m1"), &key("Item:1"), field("a"), StoredValue::Int(1));

        store.restore(Snapshot::default());
        assert!(!store.has_layers());
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn referenced_keys_walks_nested_values() {
        let mut store = LayeredStore::new();
        store.put(
            None,
            &key("ROOT_QUERY"),
            field("items"),
            StoredValue::List(vec![
                StoredValue::Ref(key("Item:1")),
                StoredValue::Object(
                    [("inner".to_string(), StoredValue::Ref(key("Item:2")))]
                        .into_iter()
                        .collect(),
                ),
            ]),
        );

        let refs = store.extract().referenced_keys();
        assert!(refs.contains(&key("Item:1")));
        assert!(refs.contains(&key("Item:2")));
    }
}
