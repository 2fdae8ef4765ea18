use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CacheStats, Eviction, EvictionEvent, EvictionListener, ReferencePolicy, RevisionCache, Slot};
use crate::revision::{BranchPoint, BranchRef, BranchVersion, ObjectId, ObjectType, Revision};

/// A cache holding only the current revision of each object.
///
/// The branch of a query is ignored: there is exactly one entry per id.
/// Historical revisions are never stored.
pub struct NonAuditingCache {
    revisions: RwLock<HashMap<ObjectId, Slot>>,
    types: RwLock<HashMap<ObjectId, Arc<ObjectType>>>,
    eviction: Eviction,
}

impl NonAuditingCache {
    pub fn new(policy: ReferencePolicy) -> Self {
        Self {
            revisions: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
            eviction: Eviction::new(policy),
        }
    }

    fn reap_except(&self, keep: Option<&ObjectId>) -> usize {
        let evicted = {
            let mut revisions = self.revisions.write();
            let keys = self.eviction.select(
                revisions
                    .iter()
                    .filter(|(id, _)| Some(*id) != keep)
                    .map(|(id, slot)| (id.clone(), slot)),
                revisions.len(),
            );
            keys.into_iter()
                .filter_map(|id| revisions.remove(&id))
                .map(|slot| slot.event)
                .collect::<Vec<EvictionEvent>>()
        };
        self.eviction.notify(evicted)
    }
}

impl RevisionCache for NonAuditingCache {
    fn object_type(&self, id: &ObjectId) -> Option<Arc<ObjectType>> {
        self.types.read().get(id).cloned()
    }

    /// The current revision, if it is valid at the point's timestamp.
    fn get_revision(&self, id: &ObjectId, point: &BranchPoint) -> Option<Arc<Revision>> {
        let revisions = self.revisions.read();
        let slot = revisions
            .get(id)
            .filter(|s| s.get().is_some_and(|r| r.is_valid(point.timestamp())));
        self.eviction.hit(slot)
    }

    fn get_revision_by_version(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>> {
        let revisions = self.revisions.read();
        let slot = revisions.get(id).filter(|s| s.version() == version.version());
        self.eviction.hit(slot)
    }

    fn add_revision(&self, revision: Arc<Revision>) {
        if revision.is_historical() {
            return;
        }
        let id = revision.id().clone();
        self.types
            .write()
            .entry(id.clone())
            .or_insert_with(|| revision.object_type().clone());
        {
            let mut revisions = self.revisions.write();
            let newer_cached = revisions
                .get(&id)
                .is_some_and(|s| s.version() > revision.version() && s.get().is_some());
            if newer_cached {
                return;
            }
            let slot = self.eviction.slot(revision);
            revisions.insert(id.clone(), slot);
        }
        self.reap_except(Some(&id));
    }

    fn remove_revision(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>> {
        let mut revisions = self.revisions.write();
        if revisions.get(id)?.version() != version.version() {
            return None;
        }
        revisions.remove(id).and_then(|s| s.get())
    }

    fn get_all_revisions(&self) -> HashMap<BranchRef, Vec<Arc<Revision>>> {
        let mut grouped: HashMap<BranchRef, Vec<Arc<Revision>>> = HashMap::new();
        for revision in self.revisions.read().values().filter_map(Slot::get) {
            grouped.entry(revision.branch().clone()).or_default().push(revision);
        }
        grouped
    }

    fn clear(&self) {
        self.revisions.write().clear();
        self.types.write().clear();
    }

    fn len(&self) -> usize {
        self.revisions.read().len()
    }

    fn stats(&self) -> CacheStats {
        self.eviction.stats(self.len())
    }

    fn reap(&self) -> usize {
        self.reap_except(None)
    }

    fn add_eviction_listener(&self, listener: Arc<dyn EvictionListener>) {
        self.eviction.add_listener(listener);
    }
}
