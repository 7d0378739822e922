//! # Read Walk
//!
//! Denormalization: walks a selection set from a root entity, resolving
//! references through the layered view and assembling a plain JSON
//! result tree.
//!
//! Incompleteness is data, not failure: absent fields and dangling
//! references are recorded in the `missing` report and the walk keeps
//! going. The walk also records every (entity, field) pair it consults:
//! the dependency set that decides which writes affect this read.

use crate::fragments::{self, FragmentRegistry};
use crate::keys;
use crate::policies::{ReadContext, TypePolicies};
use crate::selection::{
    is_nonreactive, should_include, type_condition_matches, Document, Field, Selection,
    SelectionSet, VariableValues,
};
use crate::store::{LayeredStore, StoreView};
use crate::types::{CacheError, DepSet, EntityKey, StoredValue, Variables};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// One completeness gap in a read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    /// The entity the gap was observed on.
    pub entity: EntityKey,
    /// The response key of the affected field.
    pub field: String,
    /// Human-readable description of the gap.
    pub message: String,
}

impl MissingField {
    fn absent_field(key: &EntityKey, name: &str) -> Self {
        Self {
            entity: key.clone(),
            field: name.to_string(),
            message: format!("Can't find field '{name}' on {key} object"),
        }
    }

    fn dangling(parent: &EntityKey, field: &str, target: &EntityKey) -> Self {
        Self {
            entity: parent.clone(),
            field: field.to_string(),
            message: format!("Dangling reference to missing {target} object"),
        }
    }
}

/// The outcome of one read walk.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The (possibly partial) result tree.
    pub data: Value,
    /// Whether the selection was fully satisfiable (`missing` is empty).
    pub complete: bool,
    /// Every completeness gap encountered.
    pub missing: Vec<MissingField>,
    /// Every (entity, field) pair consulted to produce `data`.
    pub dependencies: DepSet,
}

impl ReadResult {
    /// Whether two results are observably identical (data, completeness
    /// and gaps; the dependency set is bookkeeping, not payload).
    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.complete == other.complete && self.missing == other.missing && self.data == other.data
    }
}

// =============================================================================
// READER
// =============================================================================

/// The read walk. One instance per read; accumulates the missing report
/// and the dependency set.
pub struct Reader<'a> {
    view: StoreView<'a>,
    policies: &'a TypePolicies,
    registry: &'a FragmentRegistry,
    document: &'a Document,
    variables: VariableValues,
    deps: DepSet,
    missing: Vec<MissingField>,
    nonreactive: u32,
}

impl<'a> Reader<'a> {
    /// Denormalize the document's root selection starting at `root`.
    pub fn read(
        store: &'a LayeredStore,
        optimistic: bool,
        policies: &'a TypePolicies,
        registry: &'a FragmentRegistry,
        document: &'a Document,
        fragment_name: Option<&str>,
        variables: &Variables,
        root: &EntityKey,
    ) -> Result<ReadResult, CacheError> {
        let selection = document.root_selection(fragment_name)?;
        let mut reader = Self {
            view: StoreView::new(store, optimistic),
            policies,
            registry,
            document,
            variables: document.resolve_variables(variables),
            deps: DepSet::new(),
            missing: Vec::new(),
            nonreactive: 0,
        };
        let data = reader.read_object(root, selection)?;
        Ok(ReadResult {
            data: Value::Object(data),
            complete: reader.missing.is_empty(),
            missing: reader.missing,
            dependencies: reader.deps,
        })
    }

    /// Read one entity's selection into a fresh result object.
    fn read_object(
        &mut self,
        key: &EntityKey,
        selection: &SelectionSet,
    ) -> Result<Map<String, Value>, CacheError> {
        let typename = self.view.typename_of(key);
        let mut out = Map::new();
        self.read_selection_into(key, selection, typename, &mut out)?;
        Ok(out)
    }

    fn read_selection_into(
        &mut self,
        key: &EntityKey,
        selection: &SelectionSet,
        typename: Option<&'a str>,
        out: &mut Map<String, Value>,
    ) -> Result<(), CacheError> {
        for item in &selection.selections {
            match item {
                Selection::Field(field) => {
                    if !should_include(&field.directives, &self.variables) {
                        continue;
                    }
                    let shielded = is_nonreactive(&field.directives);
                    if shielded {
                        self.nonreactive += 1;
                    }
                    let result = self.read_entity_field(key, field, typename, out);
                    if shielded {
                        self.nonreactive -= 1;
                    }
                    result?;
                }
                Selection::FragmentSpread { name, directives } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    let fragment = fragments::resolve(name, self.document, self.registry)?;
                    if type_condition_matches(fragment.type_condition.as_deref(), typename) {
                        self.read_selection_into(key, &fragment.selection_set, typename, out)?;
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
                        self.read_selection_into(key, selection_set, typename, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read one field of an entity: record the dependency, consult the
    /// stored value and the read policy, then render the result.
    fn read_entity_field(
        &mut self,
        key: &EntityKey,
        field: &Field,
        typename: Option<&'a str>,
        out: &mut Map<String, Value>,
    ) -> Result<(), CacheError> {
        let storage_key = keys::storage_key(field, &self.variables);
        if self.nonreactive == 0 {
            self.deps.insert((key.clone(), storage_key.clone()));
        }
        let stored = self.view.lookup(key, &storage_key).cloned();

        let read_fn = typename.and_then(|t| self.policies.read_for(t, &field.name));
        let effective = match read_fn {
            Some(read) => {
                let args = field.resolved_arguments(&self.variables);
                let mut ctx = ReadContext::new(
                    &args,
                    &self.variables,
                    key,
                    self.view,
                    self.policies,
                    &mut self.deps,
                    self.nonreactive == 0,
                );
                read(stored.as_ref(), &mut ctx)
            }
            None => stored,
        };

        match effective {
            None => self.missing.push(MissingField::absent_field(key, &field.name)),
            Some(value) => {
                if let Some(rendered) = self.read_value(
                    &value,
                    field.selection_set.as_ref(),
                    key,
                    field.response_key(),
                )? {
                    out.insert(field.response_key().to_string(), rendered);
                }
            }
        }
        Ok(())
    }

    /// Render one stored value for the result tree. `Ok(None)` means the
    /// value had to be omitted (dangling reference); the gap is already
    /// recorded by then.
    fn read_value(
        &mut self,
        value: &StoredValue,
        selection: Option<&SelectionSet>,
        parent: &EntityKey,
        field: &str,
    ) -> Result<Option<Value>, CacheError> {
        match (value, selection) {
            (StoredValue::Ref(target), Some(sub)) => {
                if !self.view.contains(target) {
                    self.missing
                        .push(MissingField::dangling(parent, field, target));
                    return Ok(None);
                }
                let object = self.read_object(target, sub)?;
                Ok(Some(Value::Object(object)))
            }
            (StoredValue::List(items), _) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    // A dangling element leaves a null placeholder so
                    // positions stay aligned; the gap itself is already
                    // in the missing report.
                    match self.read_value(item, selection, parent, field)? {
                        Some(v) => rendered.push(v),
                        None => rendered.push(Value::Null),
                    }
                }
                Ok(Some(Value::Array(rendered)))
            }
            (StoredValue::Object(map), Some(sub)) => {
                let object = self.read_inline(map, sub, parent)?;
                Ok(Some(Value::Object(object)))
            }
            _ => Ok(Some(value.to_json())),
        }
    }

    /// Read a selection against an inline (non-identifiable) object.
    /// Gaps are attributed to the owning entity; no per-field
    /// dependencies exist below entity granularity.
    fn read_inline(
        &mut self,
        map: &BTreeMap<String, StoredValue>,
        selection: &SelectionSet,
        parent: &EntityKey,
    ) -> Result<Map<String, Value>, CacheError> {
        let typename = map.get("__typename").and_then(StoredValue::as_str);
        let mut out = Map::new();
        self.read_inline_into(map, selection, typename, parent, &mut out)?;
        Ok(out)
    }

    fn read_inline_into(
        &mut self,
        map: &BTreeMap<String, StoredValue>,
        selection: &SelectionSet,
        typename: Option<&str>,
        parent: &EntityKey,
        out: &mut Map<String, Value>,
    ) -> Result<(), CacheError> {
        for item in &selection.selections {
            match item {
                Selection::Field(field) => {
                    if !should_include(&field.directives, &self.variables) {
                        continue;
                    }
                    let storage_key = keys::storage_key(field, &self.variables);
                    let stored = map.get(storage_key.as_str()).cloned();

                    let read_fn = typename.and_then(|t| self.policies.read_for(t, &field.name));
                    let effective = match read_fn {
                        Some(read) => {
                            let args = field.resolved_arguments(&self.variables);
                            let mut ctx = ReadContext::new(
                                &args,
                                &self.variables,
                                parent,
                                self.view,
                                self.policies,
                                &mut self.deps,
                                self.nonreactive == 0,
                            );
                            read(stored.as_ref(), &mut ctx)
                        }
                        None => stored,
                    };

                    match effective {
                        None => self
                            .missing
                            .push(MissingField::absent_field(parent, &field.name)),
                        Some(value) => {
                            if let Some(rendered) = self.read_value(
                                &value,
                                field.selection_set.as_ref(),
                                parent,
                                field.response_key(),
                            )? {
                                out.insert(field.response_key().to_string(), rendered);
                            }
                        }
                    }
                }
                Selection::FragmentSpread { name, directives } => {
                    if !should_include(directives, &self.variables) {
                        continue;
                    }
                    let fragment = fragments::resolve(name, self.document, self.registry)?;
                    if type_condition_matches(fragment.type_condition.as_deref(), typename) {
                        self.read_inline_into(map, &fragment.selection_set, typename, parent, out)?;
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
                        self.read_inline_into(map, selection_set, typename, parent, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
