//! # Write Walk
//!
//! Normalization: walks a response data tree in lockstep with its
//! selection set, splitting identifiable objects into entity records
//! (stored behind references) and storing everything else in place.
//!
//! The walk is atomic with respect to fragment resolution: every spread
//! reachable from the root selection is resolved before the first field
//! is stored, so an unresolvable fragment rejects the write wholesale.

use crate::fragments::{self, FragmentRegistry};
use crate::keys;
use crate::policies::{MergeContext, TypePolicies};
use crate::selection::{
    should_include, type_condition_matches, Document, Field, Selection, SelectionSet,
    VariableValues,
};
use crate::store::LayeredStore;
use crate::types::{CacheError, DirtySet, EntityKey, FieldKey, StoredValue, Variables};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// The write walk. One instance per write; holds the accumulated dirty
/// set and the resolved variable values.
pub struct Writer<'a> {
    store: &'a mut LayeredStore,
    policies: &'a TypePolicies,
    registry: &'a FragmentRegistry,
    document: &'a Document,
    variables: VariableValues,
    layer: Option<&'a str>,
    dirty: DirtySet,
}

impl<'a> Writer<'a> {
    /// Normalize `data` against the document's root selection into the
    /// store, rooted at `root`. Returns the set of (entity, field) pairs
    /// whose stored value actually changed.
    ///
    /// When `layer` is given, values land in that optimistic layer's
    /// sparse map instead of base; merge "existing" values are then
    /// resolved through the layers beneath it.
    pub fn write(
        store: &'a mut LayeredStore,
        policies: &'a TypePolicies,
        registry: &'a FragmentRegistry,
        document: &'a Document,
        fragment_name: Option<&str>,
        data: &Value,
        variables: &Variables,
        root: &EntityKey,
        layer: Option<&'a str>,
    ) -> Result<DirtySet, CacheError> {
        let selection = document.root_selection(fragment_name)?;
        validate_fragments(selection, document, registry)?;

        let object = data.as_object().ok_or_else(|| {
            CacheError::DataShape(format!(
                "expected an object at the write root, got {}",
                json_kind(data)
            ))
        })?;

        let mut writer = Self {
            store,
            policies,
            registry,
            document,
            variables: document.resolve_variables(variables),
            layer,
            dirty: DirtySet::new(),
        };
        writer.write_object(root, object, selection)?;
        Ok(writer.dirty)
    }

    /// Write one object's fields into the entity record at `key`.
    fn write_object(
        &mut self,
        key: &EntityKey,
        object: &Map<String, Value>,
        selection: &SelectionSet,
    ) -> Result<(), CacheError> {
        let typename = self.typename_of(key, object);

        for item in &selection.selections {
            match item {
                Selection::Field(field) => {
                    if !should_include(&field.directives, &self.variables) {
                        continue;
                    }
                    let Some(value) = object.get(field.response_key()) else {
                        warn!(
                            field = field.response_key(),
                            entity = key.as_str(),
                            "missing field in written data; field left unchanged"
                        );
                        continue;
                    };
                    let storage_key = keys::storage_key(field, &self.variables);
                    let incoming = self.write_value(value, field.selection_set.as_ref())?;
                    self.store_field(key, typename.as_deref(), field, storage_key, incoming);
                }
                Selection::FragmentSpread { name, directives } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    let fragment = fragments::resolve(name, self.document, self.registry)?;
                    if type_condition_matches(
                        fragment.type_condition.as_deref(),
                        typename.as_deref(),
                    ) {
                        self.write_object(key, object, &fragment.selection_set)?;
                    }
                }
                Selection::InlineFragment {
                    type_condition,
                    directives,
                    selection_set,
                } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    if type_condition_matches(type_condition.as_deref(), typename.as_deref()) {
                        self.write_object(key, object, selection_set)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Store one field, applying the merge policy for (typename, field)
    /// when registered, warning on policy-less lossy overwrites, and
    /// recording the pair as dirty when the stored value changed.
    fn store_field(
        &mut self,
        key: &EntityKey,
        typename: Option<&str>,
        field: &Field,
        storage_key: FieldKey,
        incoming: StoredValue,
    ) {
        let existing = self.store.lookup_at(self.layer, key, &storage_key).cloned();

        let merge_fn = typename.and_then(|t| self.policies.merge_for(t, &field.name));
        let merged = match merge_fn {
            Some(merge) => {
                let args = field.resolved_arguments(&self.variables);
                let mut ctx = MergeContext {
                    args: &args,
                    variables: &self.variables,
                };
                merge(existing.as_ref(), incoming, &mut ctx)
            }
            None => {
                warn_on_lossy_overwrite(key, &storage_key, existing.as_ref(), &incoming);
                incoming
            }
        };

        if self.store.put(self.layer, key, storage_key.clone(), merged) {
            self.dirty.insert((key.clone(), storage_key));
        }
    }

    /// Normalize one value position: lists element-wise, identifiable
    /// objects into their own records (leaving a reference behind),
    /// non-identifiable objects inline, scalars as-is.
    fn write_value(
        &mut self,
        value: &Value,
        selection: Option<&SelectionSet>,
    ) -> Result<StoredValue, CacheError> {
        match (value, selection) {
            (Value::Null, _) => Ok(StoredValue::Null),
            (Value::Array(items), _) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(self.write_value(item, selection)?);
                }
                Ok(StoredValue::List(list))
            }
            (Value::Object(object), Some(selection)) => {
                match keys::entity_key(object, self.policies)? {
                    Some(child) => {
                        self.write_object(&child, object, selection)?;
                        Ok(StoredValue::Ref(child))
                    }
                    None => Ok(StoredValue::Object(self.write_inline(object, selection)?)),
                }
            }
            // Leaf position (no subselection): store structurally, even
            // for object-shaped custom scalars.
            _ => Ok(StoredValue::from_json(value)),
        }
    }

    /// Normalize a non-identifiable object inline, keyed by field
    /// storage keys. Merge policies do not apply inside inline objects
    /// (they have no stable location to merge into); fields overwrite.
    fn write_inline(
        &mut self,
        object: &Map<String, Value>,
        selection: &SelectionSet,
    ) -> Result<BTreeMap<String, StoredValue>, CacheError> {
        let mut out = BTreeMap::new();
        self.write_inline_into(object, selection, &mut out)?;
        Ok(out)
    }

    fn write_inline_into(
        &mut self,
        object: &Map<String, Value>,
        selection: &SelectionSet,
        out: &mut BTreeMap<String, StoredValue>,
    ) -> Result<(), CacheError> {
        let typename = object.get("__typename").and_then(Value::as_str);

        for item in &selection.selections {
            match item {
                Selection::Field(field) => {
                    if !should_include(&field.directives, &self.variables) {
                        continue;
                    }
                    let Some(value) = object.get(field.response_key()) else {
                        warn!(
                            field = field.response_key(),
                            "missing field in written inline object"
                        );
                        continue;
                    };
                    let storage_key = keys::storage_key(field, &self.variables);
                    let stored = self.write_value(value, field.selection_set.as_ref())?;
                    out.insert(storage_key.as_str().to_string(), stored);
                }
                Selection::FragmentSpread { name, directives } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    let fragment = fragments::resolve(name, self.document, self.registry)?;
                    if type_condition_matches(fragment.type_condition.as_deref(), typename) {
                        self.write_inline_into(object, &fragment.selection_set, out)?;
                    }
                }
                Selection::InlineFragment {
                    type_condition,
                    directives,
                    selection_set,
                } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    if type_condition_matches(type_condition.as_deref(), typename) {
                        self.write_inline_into(object, selection_set, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The typename for policy lookups: the written object's own
    /// `__typename`, falling back to the one already stored on the
    /// entity record.
    fn typename_of(&self, key: &EntityKey, object: &Map<String, Value>) -> Option<String> {
        object
            .get("__typename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                self.store
                    .lookup_at(self.layer, key, &FieldKey::new("__typename"))
                    .and_then(StoredValue::as_str)
                    .map(str::to_string)
            })
    }
}

// =============================================================================
// PRE-WRITE VALIDATION
// =============================================================================

/// Resolve every fragment spread reachable from a selection set before
/// any mutation. Cyclic fragment references terminate via the visited
/// set; an unresolvable spread rejects the whole write.
fn validate_fragments(
    selection: &SelectionSet,
    document: &Document,
    registry: &FragmentRegistry,
) -> Result<(), CacheError> {
    let mut visited = BTreeSet::new();
    validate_selection(selection, document, registry, &mut visited)
}

fn validate_selection(
    selection: &SelectionSet,
    document: &Document,
    registry: &FragmentRegistry,
    visited: &mut BTreeSet<String>,
) -> Result<(), CacheError> {
    for item in &selection.selections {
        match item {
            Selection::Field(field) => {
                if let Some(sub) = &field.selection_set {
                    validate_selection(sub, document, registry, visited)?;
                }
            }
            Selection::FragmentSpread { name, .. } => {
                if visited.insert(name.clone()) {
                    let fragment = fragments::resolve(name, document, registry)?;
                    validate_selection(&fragment.selection_set, document, registry, visited)?;
                }
            }
            Selection::InlineFragment { selection_set, .. } => {
                validate_selection(selection_set, document, registry, visited)?;
            }
        }
    }
    Ok(())
}

// =============================================================================
// OVERWRITE DIAGNOSTICS
// =============================================================================

/// Best-effort lossy-overwrite diagnostic: an inline (unidentifiable)
/// object replaced by a different value without a merge policy has no
/// surviving copy anywhere, so the replacement is flagged. Replacing a
/// reference loses nothing (the entity record survives), and scalar or
/// list overwrites are ordinary updates.
fn warn_on_lossy_overwrite(
    entity: &EntityKey,
    field: &FieldKey,
    existing: Option<&StoredValue>,
    incoming: &StoredValue,
) {
    let Some(existing) = existing else { return };
    if existing == incoming {
        return;
    }
    if matches!(existing, StoredValue::Object(_)) {
        warn!(
            entity = entity.as_str(),
            field = field.as_str(),
            existing = existing.kind(),
            incoming = incoming.kind(),
            "cache data may be lost when replacing this field; define a merge policy to combine the values"
        );
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{ArgValue, Directive, Fragment};
    use serde_json::json;

    struct Fixture {
        store: LayeredStore,
        policies: TypePolicies,
        registry: FragmentRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: LayeredStore::new(),
                policies: TypePolicies::new(),
                registry: FragmentRegistry::new(),
            }
        }

        fn write(&mut self, document: &Document, data: Value) -> DirtySet {
            Writer::write(
                &mut self.store,
                &self.policies,
                &self.registry,
                document,
                None,
                &data,
                &Variables::new(),
                &EntityKey::query_root(),
                None,
            )
            .expect("write")
        }
    }

    fn item_query() -> Document {
        Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection(
                "item",
                SelectionSet::of_fields(&["__typename", "id", "text"]),
            ),
        )]))
    }

    #[test]
    fn identifiable_child_stored_as_reference() {
        let mut fx = Fixture::new();
        let dirty = fx.write(
            &item_query(),
            json!({"item": {"__typename": "Item", "id": 5, "text": "hello"}}),
        );

        assert_eq!(
            fx.store
                .lookup(&EntityKey::query_root(), &FieldKey::new("item"), false),
            Some(&StoredValue::Ref(EntityKey::new("Item:5")))
        );
        assert_eq!(
            fx.store
                .lookup(&EntityKey::new("Item:5"), &FieldKey::new("text"), false),
            Some(&StoredValue::String("hello".into()))
        );
        // Root field plus three entity fields changed.
        assert_eq!(dirty.len(), 4);
    }

    #[test]
    fn second_identical_write_is_empty() {
        let mut fx = Fixture::new();
        let data = json!({"item": {"__typename": "Item", "id": 5, "text": "hello"}});
        fx.write(&item_query(), data.clone());
        let dirty = fx.write(&item_query(), data);
        assert!(dirty.is_empty());
    }

    #[test]
    fn same_entity_from_different_fields_merges() {
        let mut fx = Fixture::new();
        let doc_a = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection("item", SelectionSet::of_fields(&["__typename", "id", "text"])),
        )]));
        let doc_b = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection(
                "featured",
                SelectionSet::of_fields(&["__typename", "id", "rating"]),
            ),
        )]));

        fx.write(&doc_a, json!({"item": {"__typename": "Item", "id": 5, "text": "hi"}}));
        fx.write(
            &doc_b,
            json!({"featured": {"__typename": "Item", "id": 5, "rating": 9}}),
        );

        let item = EntityKey::new("Item:5");
        assert_eq!(
            fx.store.lookup(&item, &FieldKey::new("text"), false),
            Some(&StoredValue::String("hi".into()))
        );
        assert_eq!(
            fx.store.lookup(&item, &FieldKey::new("rating"), false),
            Some(&StoredValue::Int(9))
        );
    }

    #[test]
    fn non_identifiable_object_stored_inline() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection("stats", SelectionSet::of_fields(&["views", "likes"])),
        )]));
        fx.write(&doc, json!({"stats": {"views": 10, "likes": 2}}));

        let stored = fx
            .store
            .lookup(&EntityKey::query_root(), &FieldKey::new("stats"), false)
            .cloned();
        assert!(matches!(stored, Some(StoredValue::Object(_))));
    }

    #[test]
    fn skip_directive_suppresses_write() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::new(vec![
            Selection::Field(Field::leaf("kept")),
            Selection::Field(
                Field::leaf("dropped").directive(Directive::skip(ArgValue::Literal(json!(true)))),
            ),
        ]));
        let dirty = fx.write(&doc, json!({"kept": 1, "dropped": 2}));

        assert_eq!(dirty.len(), 1);
        assert!(fx
            .store
            .lookup(&EntityKey::query_root(), &FieldKey::new("dropped"), false)
            .is_none());
    }

    #[test]
    fn list_order_preserved() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection("items", SelectionSet::of_fields(&["__typename", "id"])),
        )]));
        fx.write(
            &doc,
            json!({"items": [
                {"__typename": "Item", "id": 2},
                {"__typename": "Item", "id": 1},
            ]}),
        );

        let stored = fx
            .store
            .lookup(&EntityKey::query_root(), &FieldKey::new("items"), false)
            .cloned();
        assert_eq!(
            stored,
            Some(StoredValue::List(vec![
                StoredValue::Ref(EntityKey::new("Item:2")),
                StoredValue::Ref(EntityKey::new("Item:1")),
            ]))
        );
    }

    #[test]
    fn merge_policy_controls_stored_value() {
        let mut fx = Fixture::new();
        fx.policies.set_merge("Item", "tags", |existing, incoming, _ctx| {
            // Append semantics instead of overwrite.
            let mut list = match existing {
                Some(StoredValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            if let StoredValue::List(new_items) = incoming {
                list.extend(new_items);
            }
            StoredValue::List(list)
        });

        let doc = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection("item", {
                SelectionSet::new(vec![
                    Selection::Field(Field::leaf("__typename")),
                    Selection::Field(Field::leaf("id")),
                    Selection::Field(Field::leaf("tags")),
                ])
            }),
        )]));

        fx.write(
            &doc,
            json!({"item": {"__typename": "Item", "id": 1, "tags": ["a"]}}),
        );
        fx.write(
            &doc,
            json!({"item": {"__typename": "Item", "id": 1, "tags": ["b"]}}),
        );

        assert_eq!(
            fx.store
                .lookup(&EntityKey::new("Item:1"), &FieldKey::new("tags"), false),
            Some(&StoredValue::List(vec![
                StoredValue::String("a".into()),
                StoredValue::String("b".into()),
            ]))
        );
    }

    #[test]
    fn unresolvable_spread_rejects_whole_write() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::new(vec![
            Selection::Field(Field::leaf("before")),
            Selection::spread("Nowhere"),
        ]));

        let result = Writer::write(
            &mut fx.store,
            &fx.policies,
            &fx.registry,
            &doc,
            None,
            &json!({"before": 1}),
            &Variables::new(),
            &EntityKey::query_root(),
            None,
        );

        assert!(matches!(result, Err(CacheError::FragmentNotFound { .. })));
        // Nothing was written.
        assert_eq!(fx.store.entity_count(), 0);
    }

    #[test]
    fn registry_fragment_spread_resolves() {
        let mut fx = Fixture::new();
        fx.registry.register(Fragment::new(
            "ItemBits",
            Some("Item"),
            SelectionSet::of_fields(&["text"]),
        ));

        let doc = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::with_selection(
                "item",
                SelectionSet::new(vec![
                    Selection::Field(Field::leaf("__typename")),
                    Selection::Field(Field::leaf("id")),
                    Selection::spread("ItemBits"),
                ]),
            ),
        )]));

        fx.write(
            &doc,
            json!({"item": {"__typename": "Item", "id": 3, "text": "spread"}}),
        );

        assert_eq!(
            fx.store
                .lookup(&EntityKey::new("Item:3"), &FieldKey::new("text"), false),
            Some(&StoredValue::String("spread".into()))
        );
    }

    #[test]
    fn aliased_field_stores_under_schema_name() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::new(vec![Selection::Field(
            Field::leaf("title").aliased("headline"),
        )]));
        fx.write(&doc, json!({"headline": "news"}));

        assert_eq!(
            fx.store
                .lookup(&EntityKey::query_root(), &FieldKey::new("title"), false),
            Some(&StoredValue::String("news".into()))
        );
    }

    #[test]
    fn optimistic_write_lands_in_layer() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::of_fields(&["count"]));

        fx.write(&doc, json!({"count": 1}));

        let dirty = Writer::write(
            &mut fx.store,
            &fx.policies,
            &fx.registry,
            &doc,
            None,
            &json!({"count": 2}),
            &Variables::new(),
            &EntityKey::query_root(),
            Some("m1"),
        )
        .expect("optimistic write");

        assert_eq!(dirty.len(), 1);
        assert_eq!(
            fx.store
                .lookup(&EntityKey::query_root(), &FieldKey::new("count"), true),
            Some(&StoredValue::Int(2))
        );
        assert_eq!(
            fx.store
                .lookup(&EntityKey::query_root(), &FieldKey::new("count"), false),
            Some(&StoredValue::Int(1))
        );
    }

    #[test]
    fn non_object_root_is_rejected() {
        let mut fx = Fixture::new();
        let doc = Document::operation(SelectionSet::of_fields(&["a"]));
        let result = Writer::write(
            &mut fx.store,
            &fx.policies,
            &fx.registry,
            &doc,
            None,
            &json!([1, 2]),
            &Variables::new(),
            &EntityKey::query_root(),
            None,
        );
        assert!(matches!(result, Err(CacheError::DataShape(_))));
    }
}
