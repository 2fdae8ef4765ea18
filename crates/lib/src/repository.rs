//! A versioned object repository.
//!
//! [`Repository`] wires the branch tree, the revision store and the revision
//! manager together behind a small commit/read API. Commits, branch creation
//! and rebases are serialized by one commit lock; reads go through the
//! revision manager and never take it.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use handle_trait::Handle;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::branch::{
    Branch, BranchError, BranchManager, Metadata, RebaseCallbacks, RebasePhase, SegmentId,
};
use crate::constants::{DEPTH_NONE, FIRST_VERSION, UNCHUNKED, UNSPECIFIED_DATE};
use crate::revision::delta::{self, RevisionDelta};
use crate::revision::store::InMemoryRevisionStore;
use crate::revision::{
    BranchPoint, BranchRef, ObjectId, Revision, RevisionError, RevisionLoader, RevisionManager,
    RevisionManagerConfig,
};
use crate::store::{BranchStore, InMemoryBranchStore};
use crate::{Clock, Result, SystemClock, Timestamp};

/// Repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Revision cache and loading settings.
    pub revision: RevisionManagerConfig,
    /// Base timestamp of `MAIN` when the branch store is empty.
    pub main_base_timestamp: Timestamp,
}

impl RepositoryConfig {
    /// Parse a configuration from JSON. Unknown fields are rejected.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    /// [`Error::Io`](crate::Error::Io) if the file cannot be read, otherwise
    /// the errors of [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// One change in a commit.
#[derive(Debug, Clone)]
pub enum Change {
    /// Write the complete new state of an object. Branch, version and
    /// timestamps of the given revision are ignored and assigned by the
    /// commit.
    Put(Revision),
    /// Delete an object on the branch.
    Detach(ObjectId),
}

impl Change {
    pub fn id(&self) -> &ObjectId {
        match self {
            Change::Put(revision) => revision.id(),
            Change::Detach(id) => id,
        }
    }
}

/// A finished commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub branch: String,
    pub timestamp: Timestamp,
    pub message: String,
    pub ids: Vec<ObjectId>,
}

impl CommitInfo {
    /// Wall-clock time of the commit, if the timestamp is representable.
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Which side of a rebase conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the rebased branch's own change.
    Ours,
    /// Drop the branch's change and keep what the parent has now.
    Theirs,
}

/// Decides rebase conflicts.
///
/// A conflict is an object the rebased branch changed while its parent
/// changed it too after the branch forked. Returning an error fails the
/// rebase and rolls it back.
pub trait ConflictProcessor: Send {
    fn resolve(&mut self, ours: &Revision, theirs: &Revision) -> Result<Resolution>;
}

impl<F> ConflictProcessor for F
where
    F: FnMut(&Revision, &Revision) -> Result<Resolution> + Send,
{
    fn resolve(&mut self, ours: &Revision, theirs: &Revision) -> Result<Resolution> {
        self(ours, theirs)
    }
}

/// Always keeps the rebased branch's change.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOurs;

impl ConflictProcessor for KeepOurs {
    fn resolve(&mut self, _ours: &Revision, _theirs: &Revision) -> Result<Resolution> {
        Ok(Resolution::Ours)
    }
}

type InterruptHook = Box<dyn FnMut(RebasePhase) -> Result<()> + Send>;

/// Options for [`Repository::rebase`].
pub struct RebaseOptions {
    message: String,
    conflicts: Box<dyn ConflictProcessor>,
    interrupt: Option<InterruptHook>,
}

impl RebaseOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conflicts: Box::new(KeepOurs),
            interrupt: None,
        }
    }

    pub fn with_conflict_processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.conflicts = Box::new(processor);
        self
    }

    /// Install a hook called at the start of every rebase phase. An error
    /// from the hook interrupts the rebase.
    pub fn with_interrupt(mut self, hook: impl FnMut(RebasePhase) -> Result<()> + Send + 'static) -> Self {
        self.interrupt = Some(Box::new(hook));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for RebaseOptions {
    fn default() -> Self {
        Self::new("rebase")
    }
}

impl std::fmt::Debug for RebaseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebaseOptions")
            .field("message", &self.message)
            .field("interrupt", &self.interrupt.is_some())
            .finish()
    }
}

/// Handle to a repository.
///
/// Cloning the handle is cheap and every clone shares the same state.
#[derive(Clone, Handle)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    clock: Arc<dyn Clock>,
    branches: BranchManager,
    revisions: RevisionManager,
    store: Arc<InMemoryRevisionStore>,
    commit: Mutex<()>,
    log: RwLock<Vec<CommitInfo>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("branches", &self.inner.branches)
            .field("revisions", &self.inner.revisions)
            .field("commits", &self.inner.log.read().len())
            .finish()
    }
}

impl Repository {
    /// A repository with an in-memory branch store and the system clock.
    pub fn in_memory(config: RepositoryConfig) -> Result<Self> {
        Self::open(config, Arc::new(InMemoryBranchStore::new()), Arc::new(SystemClock))
    }

    /// Open a repository over `branch_store`.
    pub fn open(config: RepositoryConfig, branch_store: Arc<dyn BranchStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let branches = BranchManager::open_with_clock(branch_store, clock.clone(), config.main_base_timestamp)?;
        let store = Arc::new(InMemoryRevisionStore::new(Arc::new(branches.clone())));
        let loader: Arc<dyn RevisionLoader> = store.clone();
        let revisions = RevisionManager::new(config.revision, Some(loader));
        Ok(Self {
            inner: Arc::new(RepositoryInner {
                clock,
                branches,
                revisions,
                store,
                commit: Mutex::new(()),
                log: RwLock::new(Vec::new()),
            }),
        })
    }

    pub fn branches(&self) -> &BranchManager {
        &self.inner.branches
    }

    pub fn revisions(&self) -> &RevisionManager {
        &self.inner.revisions
    }

    pub fn revision_store(&self) -> &InMemoryRevisionStore {
        &self.inner.store
    }

    /// Every commit made through this handle's repository, oldest first.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.inner.log.read().clone()
    }

    /// The head of the branch at `path`.
    pub fn head(&self, path: &str) -> Result<BranchPoint> {
        Ok(self.inner.branches.branch_ref(path)?.head())
    }

    /// The branch at `path` as of `timestamp`.
    pub fn point(&self, path: &str, timestamp: Timestamp) -> Result<BranchPoint> {
        Ok(self.inner.branches.branch_ref(path)?.point(timestamp))
    }

    /// Commit `changes` to the branch at `path`.
    ///
    /// All changes receive the same commit timestamp, which is strictly
    /// after the branch head.
    ///
    /// # Errors
    /// - [`BranchError::BadRequest`] if the branch is deleted
    /// - [`RevisionError::ObjectNotFound`] when detaching an object that has
    ///   no live revision on the branch
    /// - [`RevisionError::ObjectTypeMismatch`] when an object changes type
    pub fn commit(&self, path: &str, message: &str, changes: Vec<Change>) -> Result<CommitInfo> {
        let _guard = self.inner.commit.lock();
        let branch = self.inner.branches.get_branch(path)?;
        if branch.is_deleted() {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: "cannot commit to a deleted branch".to_string(),
            }
            .into());
        }
        let view = self.inner.branches.store_branch(path)?;
        let branch_ref = self.inner.branches.branch_ref(path)?;
        let timestamp = self
            .inner
            .clock
            .now_millis()
            .max(branch.head_timestamp() + 1);

        let mut prepared = Vec::with_capacity(changes.len());
        let mut seen = HashSet::new();
        for change in changes {
            if !seen.insert(change.id().clone()) {
                return Err(BranchError::BadRequest {
                    path: path.to_string(),
                    reason: format!("object {} is changed twice in one commit", change.id()),
                }
                .into());
            }
            let current = self.inner.store.visible(change.id(), &view.segments, UNSPECIFIED_DATE);
            let version = match &current {
                Some(r) if r.branch() == &branch_ref => r.version() + 1,
                _ => FIRST_VERSION,
            };
            let revision = match change {
                Change::Put(template) => {
                    if let Some(known) = self.inner.store.object_type(template.id()) {
                        if known.name() != template.object_type().name() {
                            return Err(RevisionError::ObjectTypeMismatch {
                                id: template.id().clone(),
                                expected: known.name().to_string(),
                                actual: template.object_type().name().to_string(),
                            }
                            .into());
                        }
                    }
                    let mut revision = template.copy_as(branch_ref.clone(), version, timestamp);
                    revision.set_detached(false);
                    revision
                }
                Change::Detach(id) => {
                    let Some(current) = current.filter(|r| !r.is_detached()) else {
                        return Err(RevisionError::ObjectNotFound {
                            id,
                            branch: path.to_string(),
                        }
                        .into());
                    };
                    Revision::detached(current.object_type().clone(), id, branch_ref.clone(), version, timestamp)
                }
            };
            prepared.push(revision);
        }

        let ids: Vec<ObjectId> = prepared.iter().map(|r| r.id().clone()).collect();
        for revision in prepared {
            self.inner.store.write(view.segment, revision.clone())?;
            self.inner.revisions.add_revision(Arc::new(revision));
        }
        self.inner.branches.handle_commit(path, timestamp)?;

        let info = CommitInfo {
            branch: path.to_string(),
            timestamp,
            message: message.to_string(),
            ids,
        };
        debug!(branch = %path, timestamp, objects = info.ids.len(), "Committed");
        self.inner.log.write().push(info.clone());
        Ok(info)
    }

    /// Delete the object `id` on the branch at `path`.
    pub fn detach(&self, path: &str, id: &ObjectId) -> Result<CommitInfo> {
        self.commit(path, &format!("detach {id}"), vec![Change::Detach(id.clone())])
    }

    /// The revision of `id` visible at `point`, or `None` if the object does
    /// not exist there.
    pub fn get_revision(&self, id: &ObjectId, point: &BranchPoint) -> Result<Option<Arc<Revision>>> {
        self.inner
            .revisions
            .get_revision(id, point, UNCHUNKED, DEPTH_NONE, true)
    }

    /// Every revision of `id` readable from the branch at `path`, newest first.
    pub fn history(&self, id: &ObjectId, path: &str) -> Result<Vec<Revision>> {
        let view = self.inner.branches.store_branch(path)?;
        Ok(self.inner.store.history(id, &view.segments))
    }

    /// The delta between the states of `id` at `from` and `to` on the branch
    /// at `path`. `None` if the object does not exist at either point.
    pub fn diff(&self, id: &ObjectId, path: &str, from: Timestamp, to: Timestamp) -> Result<Option<RevisionDelta>> {
        let branch = self.inner.branches.branch_ref(path)?;
        let origin = self.get_revision(id, &branch.point(from))?;
        let dirty = self.get_revision(id, &branch.point(to))?;
        match (origin, dirty) {
            (Some(origin), Some(dirty)) => Ok(Some(delta::diff(&origin, &dirty)?)),
            _ => Ok(None),
        }
    }

    pub fn create_branch(&self, parent_path: &str, name: &str, metadata: Metadata) -> Result<Branch> {
        let _guard = self.inner.commit.lock();
        self.inner.branches.create_child(parent_path, name, metadata)
    }

    pub fn delete_branch(&self, path: &str) -> Result<Branch> {
        let _guard = self.inner.commit.lock();
        self.inner.branches.delete(path)
    }

    /// Rebase the branch at `path` onto the current head of `new_parent`.
    ///
    /// The branch's own changes are replayed on top of the parent's current
    /// state. On any failure, including an interrupt, the branch is left
    /// exactly as it was.
    pub fn rebase(&self, path: &str, new_parent: &str, options: RebaseOptions) -> Result<Branch> {
        let _guard = self.inner.commit.lock();
        let message = options.message.clone();
        let mut content = ContentRebase {
            repository: self,
            options,
            inherited_base: UNSPECIFIED_DATE,
        };
        let rebased = self.inner.branches.rebase(path, new_parent, &mut content)?;
        info!(branch = %path, message = %message, "Rebase committed");
        self.inner.log.write().push(CommitInfo {
            branch: path.to_string(),
            timestamp: rebased.head_timestamp(),
            message,
            ids: Vec::new(),
        });
        Ok(rebased)
    }
}

/// Moves revision content through the phases of a branch rebase.
struct ContentRebase<'a> {
    repository: &'a Repository,
    options: RebaseOptions,
    /// Base of the source branch before the rebase.
    inherited_base: Timestamp,
}

impl ContentRebase<'_> {
    fn store(&self) -> &InMemoryRevisionStore {
        &self.repository.inner.store
    }

    fn own_segments(branch: &Branch) -> BTreeSet<SegmentId> {
        branch.segment_info().map(|i| i.segments.clone()).unwrap_or_default()
    }

    fn write_segment(branch: &Branch) -> Result<SegmentId> {
        branch.segment_id().ok_or_else(|| {
            BranchError::InvalidArgument {
                path: branch.path().to_string(),
                reason: "branch has no segment".to_string(),
            }
            .into()
        })
    }

    fn branch_ref(branch: &Branch, base: Option<BranchPoint>) -> BranchRef {
        let id = branch.segment_info().map_or(0, |i| i.store_branch_id);
        BranchRef::new(id, branch.path(), base)
    }
}

impl RebaseCallbacks for ContentRebase<'_> {
    fn checkpoint(&mut self, phase: RebasePhase) -> Result<()> {
        match &mut self.options.interrupt {
            Some(hook) => hook(phase),
            None => Ok(()),
        }
    }

    fn stage(&mut self, source: &Branch, staging: &Branch) -> Result<()> {
        self.inherited_base = source.base_timestamp();
        let segment = Self::write_segment(staging)?;
        let staging_ref = Self::branch_ref(staging, None);
        for revision in self.store().latest_in(&Self::own_segments(source)) {
            let staged = revision.copy_as(staging_ref.clone(), revision.version(), revision.created());
            self.store().write(segment, staged)?;
        }
        Ok(())
    }

    fn replay(&mut self, staging: &Branch, rebased: &Branch) -> Result<Option<Timestamp>> {
        let branches = &self.repository.inner.branches;
        let parent_ref = branches.branch_ref(rebased.parent_path())?;
        let rebased_ref = Self::branch_ref(rebased, Some(parent_ref.point(rebased.base_timestamp())));
        let segment = Self::write_segment(rebased)?;
        let inherited = rebased
            .segment_info()
            .map(|i| i.parent_segments.clone())
            .unwrap_or_default();
        let timestamp = self
            .repository
            .inner
            .clock
            .now_millis()
            .max(rebased.base_timestamp() + 1);

        let mut replayed = 0;
        for ours in self.store().latest_in(&Self::own_segments(staging)) {
            let theirs = self.store().visible(ours.id(), &inherited, UNSPECIFIED_DATE);
            if let Some(theirs) = theirs.filter(|t| t.created() > self.inherited_base) {
                if self.options.conflicts.resolve(&ours, &theirs)? == Resolution::Theirs {
                    debug!(id = %ours.id(), branch = %rebased.path(), "Conflict resolved with parent state");
                    continue;
                }
            }
            let revision = ours.copy_as(rebased_ref.clone(), FIRST_VERSION, timestamp);
            self.store().write(segment, revision)?;
            replayed += 1;
        }
        debug!(branch = %rebased.path(), replayed, "Replayed staged content");
        Ok((replayed > 0).then_some(timestamp))
    }

    fn discard(&mut self, staging: &Branch, rebased: Option<&Branch>) {
        for branch in std::iter::once(staging).chain(rebased) {
            if let Some(segment) = branch.segment_id() {
                self.store().discard_segment(segment);
            }
        }
    }
}
