//! # Watchers
//!
//! Live-query registrations and the dirty-set intersection test that
//! drives broadcasts.
//!
//! A watcher owns its document, variables, root and last delivered
//! result (whose dependency set decides whether a write batch affects
//! it). Watchers are kept in a `BTreeMap` keyed by a monotonically
//! assigned id, so iteration (and therefore notification) follows
//! registration order.

use crate::read::ReadResult;
use crate::types::{DepSet, DirtySet, EntityKey, Variables};
use crate::selection::Document;
use std::collections::BTreeMap;
use std::fmt;

/// Handle returned by a watch registration; used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WatchHandle(pub(crate) u64);

/// Callback invoked with each delivered result (the initial one and
/// every change after).
pub type WatchCallback = Box<dyn FnMut(&ReadResult)>;

/// One live registration.
pub(crate) struct Watcher {
    pub document: Document,
    pub fragment_name: Option<String>,
    pub variables: Variables,
    pub root: EntityKey,
    pub optimistic: bool,
    pub last: Option<ReadResult>,
    pub callback: WatchCallback,
}

impl Watcher {
    /// The dependency set of the last delivered result.
    pub fn deps(&self) -> Option<&DepSet> {
        self.last.as_ref().map(|r| &r.dependencies)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("root", &self.root)
            .field("fragment_name", &self.fragment_name)
            .field("optimistic", &self.optimistic)
            .field("delivered", &self.last.is_some())
            .finish()
    }
}

/// The watcher registry: id-ordered, ids never reused.
#[derive(Debug, Default)]
pub(crate) struct WatcherSet {
    watchers: BTreeMap<u64, Watcher>,
    next_id: u64,
}

impl WatcherSet {
    /// Register a watcher, assigning the next id.
    pub fn register(&mut self, watcher: Watcher) -> WatchHandle {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.watchers.insert(id, watcher);
        WatchHandle(id)
    }

    /// Remove a watcher immediately. Returns whether it was live.
    pub fn remove(&mut self, handle: WatchHandle) -> bool {
        self.watchers.remove(&handle.0).is_some()
    }

    pub fn get_mut(&mut self, handle: WatchHandle) -> Option<&mut Watcher> {
        self.watchers.get_mut(&handle.0)
    }

    /// Iterate watchers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (WatchHandle, &Watcher)> {
        self.watchers.iter().map(|(id, w)| (WatchHandle(*id), w))
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }
}

/// Whether a dependency set and a dirty set share any (entity, field)
/// pair. Iterates the smaller set and probes the larger one.
#[must_use]
pub(crate) fn affects(deps: &DepSet, dirty: &DirtySet) -> bool {
    let (small, large) = if deps.len() <= dirty.len() {
        (deps, dirty)
    } else {
        (dirty, deps)
    };
    small.iter().any(|pair| large.contains(pair))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldKey;
    use serde_json::json;

    fn watcher(root: &str) -> Watcher {
        Watcher {
            document: Document::default(),
            fragment_name: None,
            variables: Variables::new(),
            root: EntityKey::new(root),
            optimistic: true,
            last: None,
            callback: Box::new(|_| {}),
        }
    }

    fn pair(entity: &str, field: &str) -> (EntityKey, FieldKey) {
        (EntityKey::new(entity), FieldKey::new(field))
    }

    #[test]
    fn handles_assigned_in_registration_order() {
        let mut set = WatcherSet::default();
        let first = set.register(watcher("A"));
        let second = set.register(watcher("B"));
        assert!(first < second);

        let order: Vec<WatchHandle> = set.iter().map(|(h, _)| h).collect();
        assert_eq!(order, vec![first, second]);
    }

    #[test]
    fn remove_is_immediate() {
        let mut set = WatcherSet::default();
        let handle = set.register(watcher("A"));
        assert!(set.remove(handle));
        assert!(!set.remove(handle));
        assert!(set.is_empty());
    }

    #[test]
    fn ids_not_reused_after_removal() {
        let mut set = WatcherSet::default();
        let first = set.register(watcher("A"));
        set.remove(first);
        let second = set.register(watcher("B"));
        assert!(second > first);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn affects_requires_shared_pair() {
        let deps: DepSet = [pair("Item:5", "id"), pair("Item:5", "text")]
            .into_iter()
            .collect();

        let dirty_hit: DirtySet = [pair("Item:5", "text")].into_iter().collect();
        assert!(affects(&deps, &dirty_hit));

        let dirty_miss: DirtySet = [pair("User:1", "name"), pair("Item:6", "text")]
            .into_iter()
            .collect();
        assert!(!affects(&deps, &dirty_miss));
    }

    #[test]
    fn watcher_deps_follow_last_result() {
        let mut w = watcher("A");
        assert!(w.deps().is_none());

        w.last = Some(ReadResult {
            data: json!({}),
            complete: true,
            missing: Vec::new(),
            dependencies: [pair("Item:5", "id")].into_iter().collect(),
        });
        assert_eq!(w.deps().map(|d| d.len()), Some(1));
    }
}
