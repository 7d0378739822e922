//! # Cache Facade
//!
//! The public surface of the cache: one instance per client, owning the
//! layered store, the policy configuration, the fragment registry and
//! the live watchers.
//!
//! All mutation flows through `&mut self` entry points; nothing outside
//! this module can touch a stored record in place. Broadcasts are
//! synchronous: every committed write batch is followed by exactly one
//! notification pass over the affected watchers, in registration order.

use crate::fragments::FragmentRegistry;
use crate::gc::GarbageCollector;
use crate::keys;
use crate::policies::TypePolicies;
use crate::read::{ReadResult, Reader};
use crate::selection::{Document, Fragment};
use crate::store::{LayeredStore, Snapshot};
use crate::types::{CacheError, DirtySet, EntityKey, Variables};
use crate::watch::{self, WatchCallback, WatchHandle, Watcher, WatcherSet};
use crate::write::Writer;
use serde_json::Value;
use tracing::debug;

/// A normalized, reactive object cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    store: LayeredStore,
    policies: TypePolicies,
    registry: FragmentRegistry,
    watchers: WatcherSet,
    batch_depth: u32,
    pending: DirtySet,
}

impl Cache {
    /// Create an empty cache with default policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache with the given policy configuration.
    #[must_use]
    pub fn with_policies(policies: TypePolicies) -> Self {
        Self {
            policies,
            ..Self::default()
        }
    }

    /// Register a shared fragment definition for spread resolution.
    pub fn register_fragment(&mut self, fragment: Fragment) {
        self.registry.register(fragment);
    }

    /// Register every fragment defined in a document.
    pub fn register_fragments(&mut self, document: &Document) {
        self.registry.register_document(document);
    }

    /// The policy configuration.
    #[must_use]
    pub fn policies(&self) -> &TypePolicies {
        &self.policies
    }

    /// Number of entity records in the base layer.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.store.entity_count()
    }

    /// Number of active optimistic layers.
    #[must_use]
    pub fn optimistic_layer_count(&self) -> usize {
        self.store.layer_count()
    }

    /// Number of live watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Compute the entity key a response object normalizes to, if it is
    /// identifiable under the configured policies.
    pub fn identify(&self, data: &Value) -> Result<Option<EntityKey>, CacheError> {
        match data.as_object() {
            Some(object) => keys::entity_key(object, &self.policies),
            None => Ok(None),
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Normalize a response tree into the cache, rooted at `ROOT_QUERY`.
    /// Returns the dirty set; affected watchers are notified (or queued
    /// for the enclosing batch).
    pub fn write(
        &mut self,
        document: &Document,
        data: &Value,
        variables: &Variables,
    ) -> Result<DirtySet, CacheError> {
        self.write_inner(document, None, data, variables, EntityKey::query_root(), None)
    }

    /// Write directly at an entity id (fragment-rooted). The id is
    /// retained as an extra GC root until released or evicted.
    pub fn write_entity(
        &mut self,
        document: &Document,
        fragment_name: Option<&str>,
        data: &Value,
        variables: &Variables,
        key: EntityKey,
    ) -> Result<DirtySet, CacheError> {
        let dirty =
            self.write_inner(document, fragment_name, data, variables, key.clone(), None)?;
        self.store.retain(key);
        Ok(dirty)
    }

    /// Write into a named optimistic layer (created on first use),
    /// rooted at `ROOT_QUERY`.
    pub fn write_optimistic(
        &mut self,
        layer_id: &str,
        document: &Document,
        data: &Value,
        variables: &Variables,
    ) -> Result<DirtySet, CacheError> {
        self.write_inner(
            document,
            None,
            data,
            variables,
            EntityKey::query_root(),
            Some(layer_id),
        )
    }

    /// Write into a named optimistic layer at an entity id.
    pub fn write_entity_optimistic(
        &mut self,
        layer_id: &str,
        document: &Document,
        fragment_name: Option<&str>,
        data: &Value,
        variables: &Variables,
        key: EntityKey,
    ) -> Result<DirtySet, CacheError> {
        self.write_inner(document, fragment_name, data, variables, key, Some(layer_id))
    }

    /// Remove a named optimistic layer from wherever it sits in the
    /// stack (commit or rollback of that mutation). Every field the
    /// layer overrode is re-broadcast. Returns whether a layer existed.
    pub fn remove_optimistic(&mut self, layer_id: &str) -> bool {
        let removed = self.store.pop_layer(layer_id);
        if removed.is_empty() {
            return false;
        }
        let mut dirty = DirtySet::new();
        for layer in &removed {
            dirty.extend(layer.dirty_pairs());
        }
        debug!(layer = layer_id, fields = dirty.len(), "optimistic layer removed");
        self.commit(dirty);
        true
    }

    fn write_inner(
        &mut self,
        document: &Document,
        fragment_name: Option<&str>,
        data: &Value,
        variables: &Variables,
        root: EntityKey,
        layer: Option<&str>,
    ) -> Result<DirtySet, CacheError> {
        let dirty = Writer::write(
            &mut self.store,
            &self.policies,
            &self.registry,
            document,
            fragment_name,
            data,
            variables,
            &root,
            layer,
        )?;
        self.commit(dirty.clone());
        Ok(dirty)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read a document rooted at `ROOT_QUERY`. Returns `None` unless the
    /// selection is fully satisfiable.
    pub fn read(
        &self,
        document: &Document,
        variables: &Variables,
        optimistic: bool,
    ) -> Result<Option<Value>, CacheError> {
        let result = self.diff(document, variables, optimistic)?;
        Ok(result.complete.then_some(result.data))
    }

    /// Read a fragment document rooted at an entity id. Returns `None`
    /// unless the selection is fully satisfiable.
    pub fn read_entity(
        &self,
        document: &Document,
        fragment_name: Option<&str>,
        variables: &Variables,
        key: &EntityKey,
        optimistic: bool,
    ) -> Result<Option<Value>, CacheError> {
        let result = self.diff_entity(document, fragment_name, variables, key, optimistic)?;
        Ok(result.complete.then_some(result.data))
    }

    /// Read a document rooted at `ROOT_QUERY`, reporting partial data,
    /// completeness and the missing-field report.
    pub fn diff(
        &self,
        document: &Document,
        variables: &Variables,
        optimistic: bool,
    ) -> Result<ReadResult, CacheError> {
        self.diff_entity(document, None, variables, &EntityKey::query_root(), optimistic)
    }

    /// Read a document rooted at an entity id, reporting partial data,
    /// completeness and the missing-field report.
    pub fn diff_entity(
        &self,
        document: &Document,
        fragment_name: Option<&str>,
        variables: &Variables,
        key: &EntityKey,
        optimistic: bool,
    ) -> Result<ReadResult, CacheError> {
        Reader::read(
            &self.store,
            optimistic,
            &self.policies,
            &self.registry,
            document,
            fragment_name,
            variables,
            key,
        )
    }

    // =========================================================================
    // WATCHERS
    // =========================================================================

    /// Register a live watcher rooted at `ROOT_QUERY`. The first result
    /// is delivered synchronously before this call returns.
    pub fn watch(
        &mut self,
        document: &Document,
        variables: &Variables,
        optimistic: bool,
        callback: impl FnMut(&ReadResult) + 'static,
    ) -> Result<WatchHandle, CacheError> {
        self.watch_at(
            document,
            None,
            variables,
            EntityKey::query_root(),
            optimistic,
            Box::new(callback),
        )
    }

    /// Register a live watcher rooted at an entity id.
    pub fn watch_entity(
        &mut self,
        document: &Document,
        fragment_name: Option<&str>,
        variables: &Variables,
        key: EntityKey,
        optimistic: bool,
        callback: impl FnMut(&ReadResult) + 'static,
    ) -> Result<WatchHandle, CacheError> {
        self.watch_at(
            document,
            fragment_name,
            variables,
            key,
            optimistic,
            Box::new(callback),
        )
    }

    fn watch_at(
        &mut self,
        document: &Document,
        fragment_name: Option<&str>,
        variables: &Variables,
        root: EntityKey,
        optimistic: bool,
        callback: WatchCallback,
    ) -> Result<WatchHandle, CacheError> {
        let result = Reader::read(
            &self.store,
            optimistic,
            &self.policies,
            &self.registry,
            document,
            fragment_name,
            variables,
            &root,
        )?;
        let mut watcher = Watcher {
            document: document.clone(),
            fragment_name: fragment_name.map(str::to_string),
            variables: variables.clone(),
            root,
            optimistic,
            last: None,
            callback,
        };
        (watcher.callback)(&result);
        watcher.last = Some(result);
        Ok(self.watchers.register(watcher))
    }

    /// Cancel a watcher. Takes effect immediately: a notification queued
    /// in the current batch but not yet delivered is dropped.
    pub fn unwatch(&mut self, handle: WatchHandle) -> bool {
        self.watchers.remove(handle)
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Run several writes as one batch: their dirty sets coalesce into a
    /// single broadcast pass when the outermost batch scope closes.
    pub fn batch<R>(&mut self, scope: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth = self.batch_depth.saturating_add(1);
        let result = scope(self);
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 {
            self.flush();
        }
        result
    }

    // =========================================================================
    // EVICTION, GC, RETENTION
    // =========================================================================

    /// Evict a whole entity, or every argument variant of one named
    /// field, from the base layer. Affected watchers are notified.
    pub fn evict(&mut self, entity: &EntityKey, field_name: Option<&str>) -> bool {
        let (removed, dirty) = GarbageCollector::evict(&mut self.store, entity, field_name);
        if removed {
            self.commit(dirty);
        }
        removed
    }

    /// Run a mark-and-sweep pass over the base layer. Returns the number
    /// of entity records removed; a no-op while optimistic layers exist.
    pub fn gc(&mut self) -> usize {
        let removed = GarbageCollector::run(&mut self.store);
        if removed > 0 {
            debug!(removed, "garbage collection swept unreachable entities");
        }
        removed
    }

    /// Retain an entity id as a GC root until released or evicted.
    pub fn retain(&mut self, key: EntityKey) {
        self.store.retain(key);
    }

    /// Release a previously retained id. Returns whether it was retained.
    pub fn release(&mut self, key: &EntityKey) -> bool {
        self.store.release(key)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Snapshot the full base store plus the extra-root list.
    #[must_use]
    pub fn extract(&self) -> Snapshot {
        self.store.extract()
    }

    /// Replace the cache contents with a snapshot. Active optimistic
    /// layers are discarded and every live watcher re-reads.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.store.restore(snapshot);
        self.pending.clear();
        self.notify_watchers(&DirtySet::new(), true);
    }

    // =========================================================================
    // BROADCAST
    // =========================================================================

    /// Queue a dirty set, flushing immediately outside a batch scope.
    fn commit(&mut self, dirty: DirtySet) {
        if dirty.is_empty() {
            return;
        }
        self.pending.extend(dirty);
        if self.batch_depth == 0 {
            self.flush();
        }
    }

    /// Deliver one broadcast pass for everything queued so far.
    fn flush(&mut self) {
        let dirty = std::mem::take(&mut self.pending);
        if dirty.is_empty() || self.watchers.is_empty() {
            return;
        }
        debug!(fields = dirty.len(), watchers = self.watchers.len(), "broadcast");
        self.notify_watchers(&dirty, false);
    }

    /// Re-read affected watchers and deliver changed results in
    /// registration order. `force` re-reads every watcher regardless of
    /// dependency intersection (used after restore).
    fn notify_watchers(&mut self, dirty: &DirtySet, force: bool) {
        // Decide and re-read against the (immutable) store first; deliver
        // through the mutable callbacks second.
        let mut updates: Vec<(WatchHandle, ReadResult)> = Vec::new();
        for (handle, watcher) in self.watchers.iter() {
            let affected =
                force || watcher.deps().is_some_and(|deps| watch::affects(deps, dirty));
            if !affected {
                continue;
            }
            let reread = Reader::read(
                &self.store,
                watcher.optimistic,
                &self.policies,
                &self.registry,
                &watcher.document,
                watcher.fragment_name.as_deref(),
                &watcher.variables,
                &watcher.root,
            );
            // Fragment resolution was validated when the watcher first
            // read; a failure here means its fragments were since
            // unregistered, and the watcher simply keeps its last result.
            if let Ok(result) = reread {
                updates.push((handle, result));
            }
        }

        for (handle, result) in updates {
            let Some(watcher) = self.watchers.get_mut(handle) else {
                continue;
            };
            let changed = watcher
                .last
                .as_ref()
                .is_none_or(|last| !last.same_payload(&result));
            if changed {
                (watcher.callback)(&result);
                watcher.last = Some(result);
            } else if let Some(last) = watcher.last.as_mut() {
                // Unchanged payload: the watcher keeps its previous value
                // untouched; only the dependency bookkeeping refreshes.
                last.dependencies = result.dependencies;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
