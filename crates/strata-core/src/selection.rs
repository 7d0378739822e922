//! # Selection Module
//!
//! Parsed selection-set ASTs: the input format for writes and reads.
//!
//! Documents arrive from an external parser already validated into this
//! shape; the cache only evaluates them. The module also implements the
//! two pieces of evaluation the cache owns:
//! - variable resolution (provided values over declared defaults)
//! - directive evaluation (`@skip`, `@include`, `@nonreactive`)

use crate::types::{CacheError, Variables};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// DOCUMENT
// =============================================================================

/// A parsed query/fragment document.
///
/// Either an operation selection set, a bag of fragment definitions, or
/// both. Fragment-rooted writes/reads pick their root selection via
/// [`Document::root_selection`].
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// The operation selection set, if the document has one.
    pub operation: Option<SelectionSet>,
    /// Named fragment definitions local to this document.
    pub fragments: BTreeMap<String, Fragment>,
    /// Declared variable defaults, applied when a variable is not provided.
    pub variable_defaults: BTreeMap<String, Value>,
}

impl Document {
    /// Create a document from an operation selection set.
    #[must_use]
    pub fn operation(selection_set: SelectionSet) -> Self {
        Self {
            operation: Some(selection_set),
            ..Self::default()
        }
    }

    /// Create a document from a single fragment definition.
    #[must_use]
    pub fn fragment(fragment: Fragment) -> Self {
        let mut doc = Self::default();
        doc.fragments.insert(fragment.name.clone(), fragment);
        doc
    }

    /// Add a fragment definition.
    #[must_use]
    pub fn with_fragment(mut self, fragment: Fragment) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }

    /// Declare a variable default.
    #[must_use]
    pub fn with_variable_default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variable_defaults.insert(name.into(), value);
        self
    }

    /// Look up a local fragment definition by name.
    #[must_use]
    pub fn lookup_fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    /// Resolve the root selection set for this document.
    ///
    /// An operation document uses its operation selection. A fragment
    /// document uses the named fragment when `fragment_name` is given;
    /// otherwise it must contain exactly one fragment.
    pub fn root_selection(&self, fragment_name: Option<&str>) -> Result<&SelectionSet, CacheError> {
        if let Some(name) = fragment_name {
            return self
                .fragments
                .get(name)
                .map(|f| &f.selection_set)
                .ok_or_else(|| CacheError::FragmentNotFound {
                    name: name.to_string(),
                });
        }
        if let Some(op) = &self.operation {
            return Ok(op);
        }
        if self.fragments.len() == 1 {
            if let Some(fragment) = self.fragments.values().next() {
                return Ok(&fragment.selection_set);
            }
        }
        Err(CacheError::InvalidFragment {
            found: self.fragments.len(),
        })
    }

    /// Resolve variable values for one execution of this document:
    /// provided values take precedence, declared defaults fill the gaps,
    /// everything else stays undefined.
    #[must_use]
    pub fn resolve_variables(&self, provided: &Variables) -> VariableValues {
        let mut values = self.variable_defaults.clone();
        for (name, value) in provided {
            values.insert(name.clone(), value.clone());
        }
        VariableValues { values }
    }
}

/// A named fragment definition.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The fragment's name.
    pub name: String,
    /// The type the fragment applies to, when declared.
    pub type_condition: Option<String>,
    /// The fragment's selection set.
    pub selection_set: SelectionSet,
}

impl Fragment {
    /// Create a fragment definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        type_condition: Option<&str>,
        selection_set: SelectionSet,
    ) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.map(str::to_string),
            selection_set,
        }
    }
}

// =============================================================================
// SELECTION SETS
// =============================================================================

/// An ordered list of selections.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    /// The selections, in document order.
    pub selections: Vec<Selection>,
}

impl SelectionSet {
    /// Create a selection set from a list of selections.
    #[must_use]
    pub fn new(selections: Vec<Selection>) -> Self {
        Self { selections }
    }

    /// Convenience: a selection set of plain scalar fields by name.
    #[must_use]
    pub fn of_fields(names: &[&str]) -> Self {
        Self {
            selections: names
                .iter()
                .map(|n| Selection::Field(Field::leaf(*n)))
                .collect(),
        }
    }
}

/// One selection: a field, a named fragment spread, or an inline fragment.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A selected field.
    Field(Field),
    /// A spread of a named fragment (`...name`).
    FragmentSpread {
        /// The referenced fragment name.
        name: String,
        /// Directives on the spread.
        directives: Vec<Directive>,
    },
    /// An inline fragment (`... on Type { ... }`).
    InlineFragment {
        /// The type condition, when declared.
        type_condition: Option<String>,
        /// Directives on the inline fragment.
        directives: Vec<Directive>,
        /// The fragment's selection set.
        selection_set: SelectionSet,
    },
}

impl Selection {
    /// Convenience: a named fragment spread without directives.
    #[must_use]
    pub fn spread(name: impl Into<String>) -> Self {
        Self::FragmentSpread {
            name: name.into(),
            directives: Vec::new(),
        }
    }
}

/// A selected field with alias, arguments, directives and subselection.
#[derive(Debug, Clone)]
pub struct Field {
    /// The schema field name.
    pub name: String,
    /// The response alias, when given.
    pub alias: Option<String>,
    /// Arguments, keyed by argument name.
    pub arguments: BTreeMap<String, ArgValue>,
    /// Directives on the field.
    pub directives: Vec<Directive>,
    /// The subselection for composite fields; `None` for leaves.
    pub selection_set: Option<SelectionSet>,
}

impl Field {
    /// A leaf field with no arguments, directives or subselection.
    #[must_use]
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: BTreeMap::new(),
            directives: Vec::new(),
            selection_set: None,
        }
    }

    /// A composite field with a subselection.
    #[must_use]
    pub fn with_selection(name: impl Into<String>, selection_set: SelectionSet) -> Self {
        Self {
            selection_set: Some(selection_set),
            ..Self::leaf(name)
        }
    }

    /// Set the response alias.
    #[must_use]
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a literal argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), ArgValue::Literal(value));
        self
    }

    /// Add a variable-sourced argument.
    #[must_use]
    pub fn arg_var(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.arguments
            .insert(name.into(), ArgValue::Variable(variable.into()));
        self
    }

    /// Add a directive.
    #[must_use]
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// The key under which this field appears in a response object
    /// (alias if present, schema name otherwise).
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Resolve this field's arguments against variable values.
    ///
    /// Arguments whose value is undefined (an unbound, defaultless
    /// variable) are omitted entirely.
    #[must_use]
    pub fn resolved_arguments(&self, variables: &VariableValues) -> BTreeMap<String, Value> {
        self.arguments
            .iter()
            .filter_map(|(name, arg)| arg.resolve(variables).map(|v| (name.clone(), v)))
            .collect()
    }
}

// =============================================================================
// ARGUMENT VALUES
// =============================================================================

/// An argument value as written in the document: a literal, a variable
/// reference, or a structure containing either.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// A literal JSON value.
    Literal(Value),
    /// A variable reference (`$name`).
    Variable(String),
    /// A list of argument values.
    List(Vec<ArgValue>),
    /// An input object of argument values.
    Object(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Resolve to a concrete JSON value, or `None` when undefined.
    ///
    /// Undefined entries are omitted from input objects and become null
    /// inside lists (positions must be preserved).
    #[must_use]
    pub fn resolve(&self, variables: &VariableValues) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v.clone()),
            Self::Variable(name) => variables.get(name).cloned(),
            Self::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            Self::Object(map) => Some(Value::Object(
                map.iter()
                    .filter_map(|(k, v)| v.resolve(variables).map(|r| (k.clone(), r)))
                    .collect(),
            )),
        }
    }
}

/// Fully resolved variable values for one execution (provided values
/// merged over declared defaults). Absent names are undefined.
#[derive(Debug, Clone, Default)]
pub struct VariableValues {
    values: BTreeMap<String, Value>,
}

impl VariableValues {
    /// Look up a variable's resolved value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

// =============================================================================
// DIRECTIVES
// =============================================================================

/// A directive application (`@name(args...)`).
#[derive(Debug, Clone)]
pub struct Directive {
    /// The directive name, without the `@`.
    pub name: String,
    /// The directive's arguments.
    pub arguments: BTreeMap<String, ArgValue>,
}

impl Directive {
    /// `@skip(if: <condition>)`.
    #[must_use]
    pub fn skip(condition: ArgValue) -> Self {
        let mut arguments = BTreeMap::new();
        arguments.insert("if".to_string(), condition);
        Self {
            name: "skip".to_string(),
            arguments,
        }
    }

    /// `@include(if: <condition>)`.
    #[must_use]
    pub fn include(condition: ArgValue) -> Self {
        let mut arguments = BTreeMap::new();
        arguments.insert("if".to_string(), condition);
        Self {
            name: "include".to_string(),
            arguments,
        }
    }

    /// `@nonreactive`.
    #[must_use]
    pub fn nonreactive() -> Self {
        Self {
            name: "nonreactive".to_string(),
            arguments: BTreeMap::new(),
        }
    }
}

/// Evaluate `@skip`/`@include` directives: `false` means the selection
/// contributes nothing to the walk.
#[must_use]
pub fn should_include(directives: &[Directive], variables: &VariableValues) -> bool {
    for directive in directives {
        match directive.name.as_str() {
            "skip" => {
                if condition_is_true(directive, variables) {
                    return false;
                }
            }
            "include" => {
                if directive.arguments.contains_key("if")
                    && !condition_is_true(directive, variables)
                {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

/// Whether a selection is marked `@nonreactive` (read into data but
/// excluded from the dependency set).
#[must_use]
pub fn is_nonreactive(directives: &[Directive]) -> bool {
    directives.iter().any(|d| d.name == "nonreactive")
}

/// A directive condition holds only when its `if` argument resolves to
/// boolean `true`.
fn condition_is_true(directive: &Directive, variables: &VariableValues) -> bool {
    directive
        .arguments
        .get("if")
        .and_then(|arg| arg.resolve(variables))
        == Some(Value::Bool(true))
}

/// Whether a fragment's type condition applies to an object.
///
/// Without schema knowledge this is best-effort: an absent condition
/// always applies, and an object without `__typename` accepts any
/// condition (write/read symmetry matters more than strictness here).
#[must_use]
pub fn type_condition_matches(condition: Option<&str>, typename: Option<&str>) -> bool {
    match (condition, typename) {
        (None, _) | (Some(_), None) => true,
        (Some(cond), Some(name)) => cond == name,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn no_vars(doc: &Document) -> VariableValues {
        doc.resolve_variables(&BTreeMap::new())
    }

    #[test]
    fn root_selection_prefers_operation() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]));
        assert!(doc.root_selection(None).is_ok());
    }

    #[test]
    fn root_selection_single_fragment() {
        let doc = Document::fragment(Fragment::new(
            "ItemFields",
            Some("Item"),
            SelectionSet::of_fields(&["id"]),
        ));
        assert!(doc.root_selection(None).is_ok());
    }

    #[test]
    fn root_selection_rejects_ambiguous_fragments() {
        let doc = Document::fragment(Fragment::new("A", None, SelectionSet::of_fields(&["a"])))
            .with_fragment(Fragment::new("B", None, SelectionSet::of_fields(&["b"])));

        assert!(matches!(
            doc.root_selection(None),
            Err(CacheError::InvalidFragment { found: 2 })
        ));
    }

    #[test]
    fn root_selection_rejects_empty_document() {
        let doc = Document::default();
        assert!(matches!(
            doc.root_selection(None),
            Err(CacheError::InvalidFragment { found: 0 })
        ));
    }

    #[test]
    fn root_selection_by_name() {
        let doc = Document::fragment(Fragment::new("A", None, SelectionSet::of_fields(&["a"])))
            .with_fragment(Fragment::new("B", None, SelectionSet::of_fields(&["b"])));

        assert!(doc.root_selection(Some("B")).is_ok());
        assert!(matches!(
            doc.root_selection(Some("C")),
            Err(CacheError::FragmentNotFound { .. })
        ));
    }

    #[test]
    fn variable_defaults_fill_gaps() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]))
            .with_variable_default("limit", json!(10));

        let mut provided = BTreeMap::new();
        provided.insert("offset".to_string(), json!(5));

        let vars = doc.resolve_variables(&provided);
        assert_eq!(vars.get("limit"), Some(&json!(10)));
        assert_eq!(vars.get("offset"), Some(&json!(5)));
        assert_eq!(vars.get("missing"), None);
    }

    #[test]
    fn provided_variables_override_defaults() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]))
            .with_variable_default("limit", json!(10));

        let mut provided = BTreeMap::new();
        provided.insert("limit".to_string(), json!(3));

        let vars = doc.resolve_variables(&provided);
        assert_eq!(vars.get("limit"), Some(&json!(3)));
    }

    #[test]
    fn resolved_arguments_omit_undefined() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]));
        let field = Field::leaf("items")
            .arg("first", json!(10))
            .arg_var("after", "cursor");

        let args = field.resolved_arguments(&no_vars(&doc));
        assert_eq!(args.len(), 1);
        assert_eq!(args.get("first"), Some(&json!(10)));
    }

    #[test]
    fn skip_and_include_evaluation() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]));
        let vars = no_vars(&doc);

        let skipped = [Directive::skip(ArgValue::Literal(json!(true)))];
        assert!(!should_include(&skipped, &vars));

        let kept = [Directive::skip(ArgValue::Literal(json!(false)))];
        assert!(should_include(&kept, &vars));

        let included = [Directive::include(ArgValue::Literal(json!(true)))];
        assert!(should_include(&included, &vars));

        let excluded = [Directive::include(ArgValue::Literal(json!(false)))];
        assert!(!should_include(&excluded, &vars));
    }

    #[test]
    fn include_with_unbound_variable_excludes() {
        let doc = Document::operation(SelectionSet::of_fields(&["a"]));
        let directives = [Directive::include(ArgValue::Variable("flag".to_string()))];
        assert!(!should_include(&directives, &no_vars(&doc)));
    }

    #[test]
    fn type_condition_matching() {
        assert!(type_condition_matches(None, Some("Item")));
        assert!(type_condition_matches(Some("Item"), Some("Item")));
        assert!(!type_condition_matches(Some("Item"), Some("User")));
        assert!(type_condition_matches(Some("Item"), None));
    }

    #[test]
    fn nonreactive_detection() {
        assert!(is_nonreactive(&[Directive::nonreactive()]));
        assert!(!is_nonreactive(&[]));
    }
}
