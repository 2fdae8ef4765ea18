use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CacheStats, Eviction, EvictionListener, ReferencePolicy, RevisionCache, Slot};
use crate::constants::MAIN_BRANCH_ID;
use crate::revision::{BranchPoint, BranchRef, BranchVersion, ObjectId, ObjectType, Revision};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListKey {
    id: ObjectId,
    branch: i32,
}

/// A cache keeping every version of an object, newest first.
///
/// A branching cache keeps a separate version list per branch. A plain
/// auditing cache files every revision under one list per object.
pub struct AuditingCache {
    branching: bool,
    lists: RwLock<HashMap<ListKey, Vec<Slot>>>,
    types: RwLock<HashMap<ObjectId, Arc<ObjectType>>>,
    eviction: Eviction,
}

impl AuditingCache {
    /// An auditing cache that ignores branches.
    pub fn new(policy: ReferencePolicy) -> Self {
        Self::with_branching(policy, false)
    }

    /// An auditing cache with one version list per branch.
    pub fn branching(policy: ReferencePolicy) -> Self {
        Self::with_branching(policy, true)
    }

    fn with_branching(policy: ReferencePolicy, branching: bool) -> Self {
        Self {
            branching,
            lists: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
            eviction: Eviction::new(policy),
        }
    }

    pub fn is_branching(&self) -> bool {
        self.branching
    }

    fn key(&self, id: &ObjectId, branch: &BranchRef) -> ListKey {
        ListKey {
            id: id.clone(),
            branch: if self.branching { branch.id() } else { MAIN_BRANCH_ID },
        }
    }

    fn reap_except(&self, keep: Option<(&ListKey, i32)>) -> usize {
        let evicted = {
            let mut lists = self.lists.write();
            let len = lists.values().map(Vec::len).sum();
            let victims = self.eviction.select(
                lists.iter().flat_map(|(key, slots)| {
                    slots
                        .iter()
                        .filter(move |s| keep != Some((key, s.version())))
                        .map(move |s| ((key.clone(), s.version()), s))
                }),
                len,
            );
            let mut evicted = Vec::with_capacity(victims.len());
            for (key, version) in victims {
                if let Some(slots) = lists.get_mut(&key) {
                    if let Some(pos) = slots.iter().position(|s| s.version() == version) {
                        evicted.push(slots.remove(pos).event);
                    }
                    if slots.is_empty() {
                        lists.remove(&key);
                    }
                }
            }
            evicted
        };
        self.eviction.notify(evicted)
    }
}

impl RevisionCache for AuditingCache {
    fn object_type(&self, id: &ObjectId) -> Option<Arc<ObjectType>> {
        self.types.read().get(id).cloned()
    }

    /// The newest cached revision whose validity range contains the point's
    /// timestamp.
    fn get_revision(&self, id: &ObjectId, point: &BranchPoint) -> Option<Arc<Revision>> {
        let lists = self.lists.read();
        let slot = lists.get(&self.key(id, point.branch())).and_then(|slots| {
            slots
                .iter()
                .find(|s| s.get().is_some_and(|r| r.is_valid(point.timestamp())))
        });
        self.eviction.hit(slot)
    }

    fn get_revision_by_version(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>> {
        let lists = self.lists.read();
        let slot = lists
            .get(&self.key(id, version.branch()))
            .and_then(|slots| slots.iter().find(|s| s.version() == version.version()));
        self.eviction.hit(slot)
    }

    fn add_revision(&self, revision: Arc<Revision>) {
        let key = self.key(revision.id(), revision.branch());
        let version = revision.version();
        self.types
            .write()
            .entry(key.id.clone())
            .or_insert_with(|| revision.object_type().clone());
        {
            let mut lists = self.lists.write();
            let slots = lists.entry(key.clone()).or_default();
            let slot = self.eviction.slot(revision);
            match slots.iter().position(|s| s.version() <= version) {
                Some(pos) if slots[pos].version() == version => slots[pos] = slot,
                Some(pos) => slots.insert(pos, slot),
                None => slots.push(slot),
            }
        }
        self.reap_except(Some((&key, version)));
    }

    fn remove_revision(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>> {
        let key = self.key(id, version.branch());
        let mut lists = self.lists.write();
        let slots = lists.get_mut(&key)?;
        let pos = slots.iter().position(|s| s.version() == version.version())?;
        let removed = slots.remove(pos);
        if slots.is_empty() {
            lists.remove(&key);
        }
        removed.get()
    }

    fn get_all_revisions(&self) -> HashMap<BranchRef, Vec<Arc<Revision>>> {
        let mut grouped: HashMap<BranchRef, Vec<Arc<Revision>>> = HashMap::new();
        for revision in self.lists.read().values().flatten().filter_map(Slot::get) {
            grouped.entry(revision.branch().clone()).or_default().push(revision);
        }
        grouped
    }

    fn clear(&self) {
        self.lists.write().clear();
        self.types.write().clear();
    }

    fn len(&self) -> usize {
        self.lists.read().values().map(Vec::len).sum()
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

impl std::fmt::Debug for AuditingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditingCache")
            .field("branching", &self.branching)
            .field("len", &self.len())
            .finish()
    }
}
