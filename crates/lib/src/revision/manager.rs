//! The revision manager.
//!
//! [`RevisionManager`] sits between readers and a [`RevisionCache`]. Reads are
//! answered from the cache when possible and otherwise loaded through a
//! [`RevisionLoader`]. Two independent critical sections guard the cache:
//!
//! - **load-and-add** serializes "check cache, load, insert" so two concurrent
//!   misses for the same object cannot both load it, and inserts cannot
//!   interleave with version closing.
//! - **revise** serializes explicit close-outs.

use std::sync::Arc;

use handle_trait::Handle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::{ReferencePolicy, RevisionCache, create_cache};
use super::{
    BranchPoint, BranchRef, BranchVersion, ObjectId, ObjectType, Revision, RevisionError,
    RevisionInfo, RevisionLoader,
};
use crate::constants::{DEPTH_NONE, FIRST_VERSION, UNCHUNKED, UNSPECIFIED_DATE};
use crate::{Result, Timestamp};

/// Configuration of a [`RevisionManager`] and the cache it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevisionManagerConfig {
    /// Keep historical revisions in the cache.
    pub supporting_audits: bool,
    /// Keep one version list per branch. Implies `supporting_audits`.
    pub supporting_branches: bool,
    /// How cache entries are held.
    pub reference_policy: ReferencePolicy,
    /// Load missing revisions through the loader. When off, reads only see
    /// what is cached.
    pub load_on_demand: bool,
}

impl Default for RevisionManagerConfig {
    fn default() -> Self {
        Self {
            supporting_audits: true,
            supporting_branches: true,
            reference_policy: ReferencePolicy::default(),
            load_on_demand: true,
        }
    }
}

/// Handle to a revision cache and its loading protocol.
///
/// Cloning the handle is cheap and every clone shares the same cache.
#[derive(Clone, Handle)]
pub struct RevisionManager {
    inner: Arc<RevisionManagerInner>,
}

struct RevisionManagerInner {
    config: RevisionManagerConfig,
    cache: Arc<dyn RevisionCache>,
    loader: Option<Arc<dyn RevisionLoader>>,
    load_and_add: Mutex<()>,
    revise: Mutex<()>,
}

impl std::fmt::Debug for RevisionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionManager")
            .field("config", &self.inner.config)
            .field("cached", &self.inner.cache.len())
            .field("has_loader", &self.inner.loader.is_some())
            .finish()
    }
}

impl RevisionManager {
    /// Create a manager with the cache variant the config asks for.
    pub fn new(config: RevisionManagerConfig, loader: Option<Arc<dyn RevisionLoader>>) -> Self {
        let cache = create_cache(
            config.supporting_audits,
            config.supporting_branches,
            config.reference_policy,
        );
        Self::with_cache(config, cache, loader)
    }

    /// Create a manager over an existing cache.
    pub fn with_cache(
        config: RevisionManagerConfig,
        cache: Arc<dyn RevisionCache>,
        loader: Option<Arc<dyn RevisionLoader>>,
    ) -> Self {
        Self {
            inner: Arc::new(RevisionManagerInner {
                config,
                cache,
                loader,
                load_and_add: Mutex::new(()),
                revise: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &RevisionManagerConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<dyn RevisionCache> {
        &self.inner.cache
    }

    pub fn is_supporting_audits(&self) -> bool {
        self.inner.config.supporting_audits || self.inner.config.supporting_branches
    }

    pub fn is_supporting_branches(&self) -> bool {
        self.inner.config.supporting_branches
    }

    /// The type of an object, from the cache or by loading its first version
    /// on `main`.
    pub fn get_object_type(&self, id: &ObjectId, main: &BranchRef) -> Result<Option<Arc<ObjectType>>> {
        if let Some(t) = self.inner.cache.object_type(id) {
            return Ok(Some(t));
        }
        let revision = self.get_revision_by_version(id, &main.version(FIRST_VERSION), 0, true)?;
        Ok(revision.map(|r| r.object_type().clone()))
    }

    /// Whether the revision valid at `point` can be answered without loading.
    pub fn contains_revision(&self, id: &ObjectId, point: &BranchPoint) -> bool {
        if self.is_supporting_branches() {
            return !matches!(self.create_revision_info(id, point), RevisionInfo::Missing { .. });
        }
        self.inner.cache.get_revision(id, point).is_some()
    }

    pub fn contains_revision_by_version(&self, id: &ObjectId, version: &BranchVersion) -> bool {
        self.inner.cache.get_revision_by_version(id, version).is_some()
    }

    /// Load or look up one exact version.
    ///
    /// Versions below [`FIRST_VERSION`] are rejected. A detached revision is
    /// returned as is.
    pub fn get_revision_by_version(
        &self,
        id: &ObjectId,
        version: &BranchVersion,
        chunk_size: i32,
        load_on_demand: bool,
    ) -> Result<Option<Arc<Revision>>> {
        if version.version() < FIRST_VERSION {
            return Err(RevisionError::InvalidVersion {
                id: id.clone(),
                version: version.version(),
            }
            .into());
        }

        let _guard = self.inner.load_and_add.lock();
        if let Some(cached) = self.inner.cache.get_revision_by_version(id, version) {
            return Ok(Some(cached));
        }
        if !(load_on_demand && self.inner.config.load_on_demand) {
            return Ok(None);
        }
        let Some(loader) = &self.inner.loader else {
            return Ok(None);
        };
        let Some(loaded) = loader.load_revision_by_version(id, version, chunk_size)? else {
            return Ok(None);
        };
        debug!(id = %id, branch = %version.branch(), version = version.version(), "Loaded revision by version");
        let loaded = Arc::new(loaded);
        self.add_revision_locked(loaded.clone());
        Ok(Some(loaded))
    }

    /// The revision of `id` valid at `point`, or `None` if the object does
    /// not exist there.
    pub fn get_revision(
        &self,
        id: &ObjectId,
        point: &BranchPoint,
        chunk_size: i32,
        prefetch_depth: i32,
        load_on_demand: bool,
    ) -> Result<Option<Arc<Revision>>> {
        let mut revisions = self.get_revisions(
            std::slice::from_ref(id),
            point,
            chunk_size,
            prefetch_depth,
            load_on_demand,
        )?;
        Ok(revisions.pop().flatten())
    }

    /// The revisions of `ids` valid at `point`, aligned with `ids`.
    ///
    /// Every id is checked against the cache first. The remaining ids are
    /// loaded in a single batch.
    pub fn get_revisions(
        &self,
        ids: &[ObjectId],
        point: &BranchPoint,
        chunk_size: i32,
        prefetch_depth: i32,
        load_on_demand: bool,
    ) -> Result<Vec<Option<Arc<Revision>>>> {
        let load = load_on_demand && self.inner.config.load_on_demand && self.inner.loader.is_some();
        let prefetch = prefetch_depth != DEPTH_NONE;

        let infos: Vec<RevisionInfo> = ids.iter().map(|id| self.create_revision_info(id, point)).collect();
        let mut results: Vec<Option<Arc<Revision>>> = infos.iter().map(|i| i.cached().cloned()).collect();

        let pending: Vec<usize> = if load {
            (0..infos.len())
                .filter(|i| prefetch || infos[*i].is_load_needed())
                .collect()
        } else {
            Vec::new()
        };

        if !pending.is_empty() {
            self.load_pending(&infos, &pending, point, chunk_size, prefetch_depth, &mut results)?;
        }

        Ok(results
            .into_iter()
            .map(|r| r.filter(|r| !r.is_detached()))
            .collect())
    }

    fn load_pending(
        &self,
        infos: &[RevisionInfo],
        pending: &[usize],
        point: &BranchPoint,
        chunk_size: i32,
        prefetch_depth: i32,
        results: &mut [Option<Arc<Revision>>],
    ) -> Result<()> {
        let Some(loader) = &self.inner.loader else {
            return Ok(());
        };

        let _guard = self.inner.load_and_add.lock();

        // Another reader may have filled the cache while we waited.
        let mut batch = Vec::with_capacity(pending.len());
        let mut slots = Vec::with_capacity(pending.len());
        for &i in pending {
            let refreshed = self.create_revision_info(infos[i].id(), point);
            if prefetch_depth == DEPTH_NONE && !refreshed.is_load_needed() {
                results[i] = refreshed.cached().cloned();
                continue;
            }
            batch.push(refreshed);
            slots.push(i);
        }
        if batch.is_empty() {
            return Ok(());
        }

        let loaded = loader.load_revisions(&batch, point, chunk_size, prefetch_depth)?;
        debug!(branch = %point.branch(), count = batch.len(), "Loaded revisions");

        for (slot, revision) in slots.into_iter().zip(loaded) {
            results[slot] = match revision {
                Some(revision) => {
                    let version = revision.branch_version();
                    match self.inner.cache.get_revision_by_version(revision.id(), &version) {
                        Some(cached) => Some(cached),
                        None => {
                            let revision = Arc::new(revision);
                            self.add_revision_locked(revision.clone());
                            Some(revision)
                        }
                    }
                }
                None => None,
            };
        }
        Ok(())
    }

    /// Insert a freshly committed or loaded revision, closing its predecessor.
    pub fn add_revision(&self, revision: Arc<Revision>) {
        let _guard = self.inner.load_and_add.lock();
        self.add_revision_locked(revision);
    }

    fn add_revision_locked(&self, revision: Arc<Revision>) {
        let cache = &self.inner.cache;
        let id = revision.id();

        if !revision.is_historical() && revision.version() > FIRST_VERSION {
            match cache.get_revision_by_version(id, &revision.branch_version().previous()) {
                Some(previous) => {
                    if !previous.is_historical() {
                        previous.set_revised(revision.created() - 1);
                        debug!(id = %id, branch = %revision.branch(), version = previous.version(), "Closed previous version");
                    }
                }
                None => self.evict_unverified(&revision),
            }
        } else if !revision.is_historical() {
            self.evict_unverified(&revision);
        }

        debug!(id = %id, branch = %revision.branch(), version = revision.version(), "Cached revision");
        cache.add_revision(revision);
    }

    /// The predecessor of `revision` is not cached, so any current entry for
    /// the same object and branch cannot be proven superseded. Drop it so the
    /// next read goes to the loader.
    fn evict_unverified(&self, revision: &Revision) {
        let cache = &self.inner.cache;
        let point = revision.branch().point(revision.created());
        let Some(stale) = cache.get_revision(revision.id(), &point) else {
            return;
        };
        if stale.is_historical()
            || stale.branch() != revision.branch()
            || stale.version() == revision.version()
        {
            return;
        }
        warn!(
            id = %revision.id(),
            branch = %revision.branch(),
            stale_version = stale.version(),
            version = revision.version(),
            "Evicting cached revision that could not be verified as superseded"
        );
        cache.remove_revision(revision.id(), &stale.branch_version());
    }

    /// Drop the latest cached revision of `id` on `branch`.
    pub fn revise_latest(&self, id: &ObjectId, branch: &BranchRef) {
        let _guard = self.inner.revise.lock();
        let cache = &self.inner.cache;
        if let Some(latest) = cache.get_revision(id, &branch.head()) {
            cache.remove_revision(id, &latest.branch_version());
            debug!(id = %id, branch = %branch, version = latest.version(), "Revised latest revision");
        }
    }

    /// Close one cached version at `revised`.
    ///
    /// With [`UNSPECIFIED_DATE`] the version is removed from the cache instead,
    /// together with every earlier current version on the same branch it
    /// superseded.
    pub fn revise_version(&self, id: &ObjectId, version: &BranchVersion, revised: Timestamp) {
        let _guard = self.inner.revise.lock();
        let cache = &self.inner.cache;
        let Some(revision) = cache.get_revision_by_version(id, version) else {
            return;
        };

        if revised != UNSPECIFIED_DATE {
            revision.set_revised(revised);
            debug!(id = %id, branch = %version.branch(), version = version.version(), revised, "Revised version");
            return;
        }

        cache.remove_revision(id, version);
        let mut previous = version.previous();
        while previous.version() >= FIRST_VERSION {
            if let Some(old) = cache.get_revision_by_version(id, &previous) {
                if !old.is_historical() {
                    warn!(id = %id, branch = %version.branch(), version = old.version(), "Evicting superseded current revision");
                    cache.remove_revision(id, &previous);
                }
            }
            previous = previous.previous();
        }
        debug!(id = %id, branch = %version.branch(), version = version.version(), "Removed revised version");
    }

    /// Drop every cached revision.
    pub fn clear_cache(&self) {
        let _guard = self.inner.load_and_add.lock();
        self.inner.cache.clear();
    }

    /// Classify what the cache knows about `id` at `point`.
    ///
    /// With branch support, a miss on the requested branch falls back to the
    /// cached revision at the branch's base point, recursively up to `MAIN`.
    pub fn create_revision_info(&self, id: &ObjectId, point: &BranchPoint) -> RevisionInfo {
        if let Some(revision) = self.inner.cache.get_revision(id, point) {
            return RevisionInfo::Available {
                id: id.clone(),
                requested: point.clone(),
                revision,
            };
        }
        if self.is_supporting_branches() {
            let mut branch = point.branch();
            while let Some(base) = branch.base() {
                if let Some(revision) = self.inner.cache.get_revision(id, base) {
                    return RevisionInfo::Inherited {
                        id: id.clone(),
                        requested: point.clone(),
                        revision,
                    };
                }
                branch = base.branch();
            }
        }
        RevisionInfo::Missing {
            id: id.clone(),
            requested: point.clone(),
        }
    }

    /// Shorthand for [`get_revision`](Self::get_revision) with whole lists,
    /// no prefetch and loading enabled.
    pub fn revision_at(&self, id: &ObjectId, point: &BranchPoint) -> Result<Option<Arc<Revision>>> {
        self.get_revision(id, point, UNCHUNKED, DEPTH_NONE, true)
    }
}
