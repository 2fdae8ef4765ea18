//! Revision caches.
//!
//! Three variants share one contract, [`RevisionCache`]:
//!
//! - [`NonAuditingCache`] keeps only the current revision of each object and
//!   ignores the branch of a query.
//! - [`AuditingCache`] keeps a version list per object, newest first, and
//!   answers historical queries by validity range.
//! - A branching [`AuditingCache`] keeps one version list per object and
//!   branch.
//!
//! Every cache holds its entries through a [`ReferencePolicy`]. Entries that
//! are reclaimed are reported to the registered [`EvictionListener`]s.
//! Reclaiming happens opportunistically on insertion and on [`RevisionCache::reap`];
//! caches never spawn threads of their own.

mod audit;
mod noaudit;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use audit::AuditingCache;
pub use noaudit::NonAuditingCache;

use super::{BranchPoint, BranchRef, BranchVersion, ObjectId, ObjectType, Revision};

/// How a cache holds on to its revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Entries stay until removed explicitly. Deterministic; meant for tests.
    Strong,
    /// Entries are held strongly up to `capacity`. Beyond that, the least
    /// recently used entries that no caller still holds are evicted.
    Soft {
        /// Number of entries kept before eviction starts
        capacity: usize,
    },
    /// Entries are held weakly and vanish as soon as no caller holds them.
    Weak,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        ReferencePolicy::Soft { capacity: 10_000 }
    }
}

/// Identity of an evicted revision. The payload is gone by the time the
/// event is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvictionEvent {
    pub id: ObjectId,
    pub branch: BranchRef,
    pub version: i32,
}

/// Receives eviction notifications.
///
/// Listeners run on the thread that triggered the eviction, after the cache
/// lock has been released.
pub trait EvictionListener: Send + Sync {
    fn evicted(&self, event: &EvictionEvent);
}

impl<F> EvictionListener for F
where
    F: Fn(&EvictionEvent) + Send + Sync,
{
    fn evicted(&self, event: &EvictionEvent) {
        self(event)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups the cache could not answer
    pub misses: u64,
    /// Entries evicted by the reference policy
    pub evictions: u64,
    /// Entries currently held
    pub entries: usize,
}

/// The contract shared by all revision caches.
///
/// All methods are safe to call concurrently. Each cache guards its maps
/// with a single lock.
pub trait RevisionCache: Send + Sync {
    /// The type of a cached object.
    fn object_type(&self, id: &ObjectId) -> Option<Arc<ObjectType>>;

    /// The cached revision valid at `point`.
    fn get_revision(&self, id: &ObjectId, point: &BranchPoint) -> Option<Arc<Revision>>;

    /// The cached revision with exactly this version.
    fn get_revision_by_version(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>>;

    /// Store a revision, replacing an entry with the same version.
    fn add_revision(&self, revision: Arc<Revision>);

    /// Drop one version; returns it if it was cached and still alive.
    fn remove_revision(&self, id: &ObjectId, version: &BranchVersion) -> Option<Arc<Revision>>;

    /// Every live cached revision, grouped by branch.
    fn get_all_revisions(&self) -> HashMap<BranchRef, Vec<Arc<Revision>>>;

    /// Drop every entry without notifying eviction listeners.
    fn clear(&self);

    /// Number of entries, including ones not reaped yet.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;

    /// Apply the reference policy now; returns the number of evicted entries.
    fn reap(&self) -> usize;

    fn add_eviction_listener(&self, listener: Arc<dyn EvictionListener>);
}

/// Create the cache variant matching the requested capabilities.
///
/// Branch support implies audit support.
pub fn create_cache(
    supporting_audits: bool,
    supporting_branches: bool,
    policy: ReferencePolicy,
) -> Arc<dyn RevisionCache> {
    if supporting_branches {
        Arc::new(AuditingCache::branching(policy))
    } else if supporting_audits {
        Arc::new(AuditingCache::new(policy))
    } else {
        Arc::new(NonAuditingCache::new(policy))
    }
}

enum Reference {
    Strong(Arc<Revision>),
    Weak(Weak<Revision>),
}

/// One cached revision, held according to the cache's policy.
pub(crate) struct Slot {
    event: EvictionEvent,
    reference: Reference,
    last_used: AtomicU64,
}

impl Slot {
    fn new(revision: Arc<Revision>, policy: ReferencePolicy, tick: u64) -> Self {
        let event = EvictionEvent {
            id: revision.id().clone(),
            branch: revision.branch().clone(),
            version: revision.version(),
        };
        let reference = match policy {
            ReferencePolicy::Weak => Reference::Weak(Arc::downgrade(&revision)),
            ReferencePolicy::Strong | ReferencePolicy::Soft { .. } => Reference::Strong(revision),
        };
        Self {
            event,
            reference,
            last_used: AtomicU64::new(tick),
        }
    }

    fn version(&self) -> i32 {
        self.event.version
    }

    fn get(&self) -> Option<Arc<Revision>> {
        match &self.reference {
            Reference::Strong(r) => Some(r.clone()),
            Reference::Weak(w) => w.upgrade(),
        }
    }

    fn touch(&self, tick: u64) {
        self.last_used.store(tick, Ordering::Relaxed);
    }

    fn is_dead(&self) -> bool {
        match &self.reference {
            Reference::Strong(_) => false,
            Reference::Weak(w) => w.strong_count() == 0,
        }
    }

    /// Whether only the cache still holds the revision.
    fn is_unreferenced(&self) -> bool {
        match &self.reference {
            Reference::Strong(r) => Arc::strong_count(r) == 1,
            Reference::Weak(w) => w.strong_count() == 0,
        }
    }
}

/// Policy, statistics and listeners shared by all cache variants.
pub(crate) struct Eviction {
    policy: ReferencePolicy,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn EvictionListener>>>,
}

impl Eviction {
    fn new(policy: ReferencePolicy) -> Self {
        Self {
            policy,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, revision: Arc<Revision>) -> Slot {
        Slot::new(revision, self.policy, self.next_tick())
    }

    /// Upgrade a slot found by a lookup and record the hit or miss.
    fn hit(&self, slot: Option<&Slot>) -> Option<Arc<Revision>> {
        let revision = slot.and_then(|s| {
            let r = s.get()?;
            s.touch(self.next_tick());
            Some(r)
        });
        let counter = if revision.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        revision
    }

    /// Choose the slots to evict among `slots`, given `len` held entries.
    fn select<'a, K>(&self, slots: impl Iterator<Item = (K, &'a Slot)>, len: usize) -> Vec<K> {
        match self.policy {
            ReferencePolicy::Strong => Vec::new(),
            ReferencePolicy::Weak => slots.filter(|(_, s)| s.is_dead()).map(|(k, _)| k).collect(),
            ReferencePolicy::Soft { capacity } => {
                if len <= capacity {
                    return Vec::new();
                }
                let mut candidates: Vec<(u64, K)> = slots
                    .filter(|(_, s)| s.is_unreferenced())
                    .map(|(k, s)| (s.last_used.load(Ordering::Relaxed), k))
                    .collect();
                candidates.sort_by_key(|(tick, _)| *tick);
                candidates
                    .into_iter()
                    .take(len - capacity)
                    .map(|(_, k)| k)
                    .collect()
            }
        }
    }

    /// Count and announce evicted entries. Must be called without the cache
    /// lock held.
    fn notify(&self, evicted: Vec<EvictionEvent>) -> usize {
        let count = evicted.len();
        if count == 0 {
            return 0;
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        let listeners = self.listeners.read().clone();
        for event in &evicted {
            debug!(id = %event.id, branch = %event.branch, version = event.version, "Evicted revision");
            for listener in &listeners {
                listener.evicted(event);
            }
        }
        count
    }

    fn add_listener(&self, listener: Arc<dyn EvictionListener>) {
        self.listeners.write().push(listener);
    }

    fn stats(&self, entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}
