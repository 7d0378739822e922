//! # Storage Key Codec & Identity Resolution
//!
//! Two pure key computations:
//!
//! - [`field_key`] / [`storage_key`]: encode a field name plus its
//!   resolved arguments into the canonical storage key used inside an
//!   entity record. The encoding is a pure function of (name, resolved
//!   arguments); which variable name or literal form produced an
//!   argument never matters.
//! - [`entity_key`]: decide whether a response object is an identifiable
//!   entity and compute its global key.
//!
//! Canonical argument serialization rides on `serde_json`'s sorted object
//! maps: building the argument object through `BTreeMap`s makes
//! `to_string` emit keys in sorted order at every nesting level.

use crate::policies::TypePolicies;
use crate::selection::{Field, VariableValues};
use crate::types::{CacheError, EntityKey, FieldKey};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// =============================================================================
// FIELD STORAGE KEYS
// =============================================================================

/// Encode a field name and its resolved arguments as a storage key.
///
/// Fields without surviving arguments use the bare name; otherwise the
/// key is `name({"arg":value,...})` with sorted argument keys.
#[must_use]
pub fn field_key(name: &str, args: &BTreeMap<String, Value>) -> FieldKey {
    if args.is_empty() {
        return FieldKey::new(name);
    }
    let object: Map<String, Value> = args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let canonical = Value::Object(object).to_string();
    FieldKey::new(format!("{name}({canonical})"))
}

/// Compute the storage key for a selected field under the given variable
/// values (variables substituted, undefined arguments omitted).
#[must_use]
pub fn storage_key(field: &Field, variables: &VariableValues) -> FieldKey {
    field_key(&field.name, &field.resolved_arguments(variables))
}

// =============================================================================
// ENTITY IDENTITY
// =============================================================================

/// Compute the global key for a response object, if it is identifiable.
///
/// Tried in order:
/// 1. the configured whole-object key function;
/// 2. declared per-type key fields (a declared key field absent on the
///    object is an error, not a silent inline);
/// 3. the built-in fallback `__typename` + `id`/`_id`. Without
///    `__typename` there is no fallback, whatever ids are present;
///    identity never collides across types that lack type information.
///
/// `Ok(None)` means the object is not identifiable and is stored inline.
pub fn entity_key(
    object: &Map<String, Value>,
    policies: &TypePolicies,
) -> Result<Option<EntityKey>, CacheError> {
    if let Some(key_of) = policies.key_of() {
        if let Some(key) = key_of(object) {
            return Ok(Some(EntityKey::new(key)));
        }
    }

    let typename = object.get("__typename").and_then(Value::as_str);

    if let Some(type_name) = typename {
        if let Some(key_fields) = policies.key_fields_for(type_name) {
            return key_from_fields(type_name, key_fields, object).map(Some);
        }
    }

    let Some(type_name) = typename else {
        return Ok(None);
    };

    let id = object.get("id").or_else(|| object.get("_id"));
    match id {
        Some(id) => Ok(Some(EntityKey::new(format!(
            "{type_name}:{}",
            scalar_segment(id)
        )))),
        None => Ok(None),
    }
}

/// Build a key-fields key: `Type:{"field":value,...}` with sorted fields.
fn key_from_fields(
    type_name: &str,
    key_fields: &[String],
    object: &Map<String, Value>,
) -> Result<EntityKey, CacheError> {
    let mut parts: BTreeMap<String, Value> = BTreeMap::new();
    for field in key_fields {
        match object.get(field) {
            Some(value) => {
                parts.insert(field.clone(), value.clone());
            }
            None => {
                return Err(CacheError::KeyFieldMissing {
                    type_name: type_name.to_string(),
                    field: field.clone(),
                });
            }
        }
    }
    let object: Map<String, Value> = parts.into_iter().collect();
    Ok(EntityKey::new(format!(
        "{type_name}:{}",
        Value::Object(object)
    )))
}

/// Render a scalar id for the `Type:id` fallback form: strings verbatim,
/// everything else in canonical JSON.
fn scalar_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{Document, SelectionSet};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn bare_name_without_arguments() {
        assert_eq!(field_key("text", &BTreeMap::new()).as_str(), "text");
    }

    #[test]
    fn argument_keys_sorted() {
        let mut args = BTreeMap::new();
        args.insert("value".to_string(), json!(42));
        args.insert("literal".to_string(), json!(true));

        assert_eq!(
            field_key("field", &args).as_str(),
            "field({\"literal\":true,\"value\":42})"
        );
    }

    #[test]
    fn literal_and_variable_forms_collide() {
        let doc = Document::operation(SelectionSet::of_fields(&["field"]));

        let literal = Field::leaf("field").arg("literal", json!(true)).arg("value", json!(42));
        let via_vars = Field::leaf("field")
            .arg_var("literal", "literal")
            .arg_var("value", "value");

        let mut provided = crate::types::Variables::new();
        provided.insert("literal".to_string(), json!(true));
        provided.insert("value".to_string(), json!(42));
        let vars = doc.resolve_variables(&provided);

        assert_eq!(storage_key(&literal, &vars), storage_key(&via_vars, &vars));
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let doc = Document::operation(SelectionSet::of_fields(&["items"]))
            .with_variable_default("first", json!(10));
        let field = Field::leaf("items").arg_var("first", "first");

        let vars = doc.resolve_variables(&crate::types::Variables::new());
        assert_eq!(
            storage_key(&field, &vars).as_str(),
            "items({\"first\":10})"
        );
    }

    #[test]
    fn undefined_argument_omitted() {
        let doc = Document::operation(SelectionSet::of_fields(&["items"]));
        let field = Field::leaf("items").arg_var("after", "missing");

        let vars = doc.resolve_variables(&crate::types::Variables::new());
        assert_eq!(storage_key(&field, &vars).as_str(), "items");
    }

    #[test]
    fn fallback_identity_requires_typename() {
        let policies = TypePolicies::new();

        let with_typename = object(json!({"__typename": "Item", "id": 5}));
        assert_eq!(
            entity_key(&with_typename, &policies).expect("key"),
            Some(EntityKey::new("Item:5"))
        );

        let without_typename = object(json!({"id": 5}));
        assert_eq!(entity_key(&without_typename, &policies).expect("key"), None);
    }

    #[test]
    fn fallback_accepts_underscore_id() {
        let policies = TypePolicies::new();
        let obj = object(json!({"__typename": "Doc", "_id": "abc"}));
        assert_eq!(
            entity_key(&obj, &policies).expect("key"),
            Some(EntityKey::new("Doc:abc"))
        );
    }

    #[test]
    fn declared_key_fields_used() {
        let mut policies = TypePolicies::new();
        policies.declare_key_fields("Book", &["isbn"]);

        let obj = object(json!({"__typename": "Book", "isbn": "9991", "id": 7}));
        assert_eq!(
            entity_key(&obj, &policies).expect("key"),
            Some(EntityKey::new("Book:{\"isbn\":\"9991\"}"))
        );
    }

    #[test]
    fn missing_declared_key_field_is_an_error() {
        let mut policies = TypePolicies::new();
        policies.declare_key_fields("Book", &["isbn"]);

        let obj = object(json!({"__typename": "Book", "id": 7}));
        assert!(matches!(
            entity_key(&obj, &policies),
            Err(CacheError::KeyFieldMissing { .. })
        ));
    }

    #[test]
    fn global_key_function_wins() {
        let mut policies = TypePolicies::new();
        policies.set_key_of(|obj| {
            obj.get("uuid")
                .and_then(serde_json::Value::as_str)
                .map(|s| format!("U:{s}"))
        });

        let obj = object(json!({"__typename": "Item", "id": 5, "uuid": "x1"}));
        assert_eq!(
            entity_key(&obj, &policies).expect("key"),
            Some(EntityKey::new("U:x1"))
        );
    }
}
