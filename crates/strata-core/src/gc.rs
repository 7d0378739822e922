//! # Garbage Collection & Eviction
//!
//! Mark-and-sweep reachability over the base layer: mark from the three
//! operation roots plus every retained extra root, follow references
//! transitively, sweep whatever stayed unmarked.
//!
//! Collection refuses to run while any optimistic layer is active: a
//! layer may reference entities not yet reachable from the durable
//! roots, and sweeping under it would tear those references.

use crate::store::{collect_refs, LayeredStore};
use crate::types::{DirtySet, EntityKey};
use std::collections::{BTreeSet, VecDeque};

/// The collector. Stateless; operates on a store per call.
pub struct GarbageCollector;

impl GarbageCollector {
    /// Run one mark-and-sweep pass. Returns the number of entity records
    /// removed; 0 (and no sweep) while optimistic layers are active.
    pub fn run(store: &mut LayeredStore) -> usize {
        if store.has_layers() {
            return 0;
        }

        let mut marked: BTreeSet<EntityKey> = BTreeSet::new();
        let mut queue: VecDeque<EntityKey> = VecDeque::new();

        let roots = [
            EntityKey::query_root(),
            EntityKey::mutation_root(),
            EntityKey::subscription_root(),
        ];
        for root in roots {
            if marked.insert(root.clone()) {
                queue.push_back(root);
            }
        }
        for root in store.extra_roots() {
            if marked.insert(root.clone()) {
                queue.push_back(root.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            let Some(record) = store.base().get(&current) else {
                continue;
            };
            let mut referenced = BTreeSet::new();
            for (_, value) in record.iter() {
                collect_refs(value, &mut referenced);
            }
            for target in referenced {
                if marked.insert(target.clone()) {
                    queue.push_back(target);
                }
            }
        }

        store.sweep(&marked)
    }

    /// Evict a whole entity, or every argument variant of one named
    /// field, from the base layer. Children reached only through the
    /// evicted data are orphaned by design; the next [`Self::run`]
    /// re-evaluates reachability.
    ///
    /// Returns whether anything was removed, plus the (entity, field)
    /// pairs that disappeared (for broadcast purposes).
    pub fn evict(
        store: &mut LayeredStore,
        entity: &EntityKey,
        field_name: Option<&str>,
    ) -> (bool, DirtySet) {
        let mut dirty = DirtySet::new();
        match field_name {
            Some(name) => {
                for field in store.evict_field(entity, name) {
                    dirty.insert((entity.clone(), field));
                }
            }
            None => {
                if let Some(record) = store.evict_entity(entity) {
                    for (field, _) in record.iter() {
                        dirty.insert((entity.clone(), field.clone()));
                    }
                    // An entity removal also changes what "contains" says
                    // for every reference pointing at it; readers learn of
                    // it through the removed fields above.
                }
            }
        }
        (!dirty.is_empty(), dirty)
    }
}

// =============================================================================
// TESTS
// =============================================================================
