//! # Fragment Registry
//!
//! Named fragment definitions resolvable beyond the local document.
//!
//! A spread (`...name`) resolves against the document's own fragments
//! first; the registry is consulted for everything else, so fragments
//! shared across many documents need to be registered only once.

use crate::selection::{Document, Fragment};
use crate::types::CacheError;
use std::collections::BTreeMap;

/// A lookup table of named fragment definitions.
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    fragments: BTreeMap<String, Fragment>,
}

impl FragmentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fragment definition, replacing any previous definition
    /// with the same name.
    pub fn register(&mut self, fragment: Fragment) {
        self.fragments.insert(fragment.name.clone(), fragment);
    }

    /// Register every fragment defined in a document.
    pub fn register_document(&mut self, document: &Document) {
        for fragment in document.fragments.values() {
            self.register(fragment.clone());
        }
    }

    /// Look up a fragment definition by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    /// Number of registered fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Resolve a fragment spread: the document's own fragments win, the
/// registry covers the rest, anything else is an error.
pub(crate) fn resolve<'a>(
    name: &str,
    document: &'a Document,
    registry: &'a FragmentRegistry,
) -> Result<&'a Fragment, CacheError> {
    document
        .lookup_fragment(name)
        .or_else(|| registry.lookup(name))
        .ok_or_else(|| CacheError::FragmentNotFound {
            name: name.to_string(),
        })
}

// =============================================================================
// TESTS
// =============================================================================
