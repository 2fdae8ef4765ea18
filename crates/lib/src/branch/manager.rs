//! The branch tree manager.
//!
//! [`BranchManager`] owns the in-memory index of branches keyed by path and
//! keeps it in step with the backing [`BranchStore`]. The store is the single
//! source of truth: [`BranchManager::open`] rebuilds the index and the segment
//! allocator from it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use handle_trait::Handle;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use super::rebase::{RebaseCallbacks, StagedRebase};
use super::{
    Branch, BranchError, BranchState, Metadata, SegmentAllocator, SegmentInfo, SegmentView,
};
use crate::constants::{MAIN_BRANCH_ID, MAIN_PATH, MAIN_SEGMENT};
use crate::revision::{BranchPoint, BranchRef, RevisionBranchProvider};
use crate::store::{BranchStore, Params, Script, StoreError, Write};
use crate::{Clock, Result, SystemClock, Timestamp};

/// Callback notified after a branch changed.
///
/// Listeners run on the thread that performed the change, after the change is
/// durable in the store and visible in the index.
pub trait BranchChangeListener: Send + Sync {
    /// Called with the path of the branch that changed.
    fn branch_changed(&self, path: &str);
}

impl<F> BranchChangeListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn branch_changed(&self, path: &str) {
        self(path)
    }
}

/// Handle to a branch tree.
///
/// Cloning the handle is cheap and every clone operates on the same tree.
#[derive(Clone, Handle)]
pub struct BranchManager {
    inner: Arc<BranchManagerInner>,
}

struct BranchManagerInner {
    store: Arc<dyn BranchStore>,
    clock: Arc<dyn Clock>,
    /// Every stored branch, deleted ones included, keyed by path.
    branches: RwLock<HashMap<String, Branch>>,
    segments: SegmentAllocator,
    next_store_branch_id: AtomicI32,
    /// Serializes operations that reshape the tree: create, delete and rebase.
    structure: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn BranchChangeListener>>>,
}

impl std::fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchManager")
            .field("branches", &self.inner.branches.read().len())
            .field("next_segment", &self.inner.segments.peek())
            .finish()
    }
}

impl BranchManager {
    /// Open the branch tree kept in `store`, creating `MAIN` if the store is empty.
    pub fn open(store: Arc<dyn BranchStore>) -> Result<Self> {
        Self::open_with_clock(store, Arc::new(SystemClock), 0)
    }

    /// Open the branch tree with an explicit clock and `MAIN` base timestamp.
    ///
    /// The base timestamp is only used when `MAIN` does not exist yet.
    pub fn open_with_clock(
        store: Arc<dyn BranchStore>,
        clock: Arc<dyn Clock>,
        main_base_timestamp: Timestamp,
    ) -> Result<Self> {
        if !store.exists() {
            store.create()?;
        }

        let mut records = store.all()?;
        if !records.iter().any(Branch::is_main) {
            let main = Branch::main(main_base_timestamp)?.with_segments(SegmentInfo::forked(
                MAIN_SEGMENT,
                Default::default(),
                MAIN_BRANCH_ID,
            ));
            store.put(main.path(), &main)?;
            info!(base = main_base_timestamp, "Initialized MAIN branch");
            records.push(main);
        }

        let segments = SegmentAllocator::starting_after(
            records
                .iter()
                .filter_map(Branch::segment_info)
                .flat_map(|info| info.segments.iter().chain(info.parent_segments.iter())),
        );
        let next_store_branch_id = records
            .iter()
            .filter_map(|b| b.segment_info().map(|info| info.store_branch_id))
            .max()
            .map_or(MAIN_BRANCH_ID + 1, |max| max + 1);

        debug!(
            branches = records.len(),
            next_segment = segments.peek(),
            "Opened branch tree"
        );

        let branches = records
            .into_iter()
            .map(|b| (b.path().to_string(), b))
            .collect();
        Ok(Self {
            inner: Arc::new(BranchManagerInner {
                store,
                clock,
                branches: RwLock::new(branches),
                segments,
                next_store_branch_id: AtomicI32::new(next_store_branch_id),
                structure: Mutex::new(()),
                listeners: RwLock::new(Vec::new()),
            }),
        })
    }

    /// The root branch.
    pub fn main_branch(&self) -> Result<Branch> {
        self.get_branch(MAIN_PATH)
    }

    /// Look up a branch by path. Deleted branches are returned as well.
    ///
    /// # Errors
    /// Returns [`BranchError::BranchNotFound`] if no branch exists at `path`.
    pub fn get_branch(&self, path: &str) -> Result<Branch> {
        self.inner
            .branches
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                BranchError::BranchNotFound {
                    path: path.to_string(),
                }
                .into()
            })
    }

    /// Every branch in the tree, sorted by path.
    pub fn all_branches(&self) -> Vec<Branch> {
        let mut all: Vec<Branch> = self.inner.branches.read().values().cloned().collect();
        all.sort_by(|a, b| a.path().cmp(b.path()));
        all
    }

    /// All live descendants of the branch at `path`, sorted by path.
    pub fn children(&self, path: &str) -> Result<Vec<Branch>> {
        self.get_branch(path)?;
        let prefix = super::to_absolute_path(path, "");
        let mut children: Vec<Branch> = self
            .inner
            .branches
            .read()
            .values()
            .filter(|b| b.path().starts_with(&prefix) && !b.is_deleted())
            .cloned()
            .collect();
        children.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(children)
    }

    /// The parent of `branch`. The parent of `MAIN` is `MAIN` itself.
    pub fn parent(&self, branch: &Branch) -> Result<Branch> {
        if branch.is_main() {
            return self.main_branch();
        }
        self.get_branch(branch.parent_path())
    }

    /// Create a child branch named `name` under the branch at `parent_path`.
    ///
    /// The child receives a fresh segment for its own history and inherits a
    /// snapshot of everything its parent can see. The parent switches its own
    /// writes to a second fresh segment so the child never observes them.
    /// Both records are written in one store call.
    ///
    /// A deleted branch at the same path is replaced by a fresh branch.
    ///
    /// # Errors
    /// - [`BranchError::InvalidName`] for an unusable name
    /// - [`BranchError::BranchNotFound`] if the parent does not exist
    /// - [`BranchError::BadRequest`] if the parent is deleted
    /// - [`BranchError::AlreadyExists`] if a live branch exists at the path
    pub fn create_child(&self, parent_path: &str, name: &str, metadata: Metadata) -> Result<Branch> {
        super::validate_name(name)?;
        let _structure = self.inner.structure.lock();

        let parent = self.get_branch(parent_path)?;
        let path = super::to_absolute_path(parent_path, name);
        let reopened = match self.inner.branches.read().get(&path) {
            Some(existing) if !existing.is_deleted() => {
                return Err(BranchError::AlreadyExists { path }.into());
            }
            Some(_) => true,
            None => false,
        };

        let child_segment = self.inner.segments.allocate();
        let parent_segment = self.inner.segments.allocate();
        let store_branch_id = self.next_store_branch_id();

        // Snapshot the parent under the index write lock so a commit that
        // landed after the lookup above is folded into the child's base.
        let (child, base) = {
            let mut branches = self.inner.branches.write();
            let parent = branches.get(parent_path).cloned().unwrap_or(parent);
            let parent_info = self.segment_info_of(&parent)?.clone();
            let base = self.inner.clock.now_millis().max(parent.head_timestamp());
            let child = parent
                .child(name, metadata, base)?
                .with_segments(SegmentInfo::forked(
                    child_segment,
                    parent_info.inheritable(),
                    store_branch_id,
                ));
            let advance = segments_update(parent.path(), &parent_info.advanced(parent_segment));

            self.inner
                .store
                .write_all(&[Write::Put(child.clone()), advance])?;
            self.refresh(&mut branches, &[parent_path, child.path()])?;
            (child, base)
        };

        info!(
            branch = %child.path(),
            segment = child_segment,
            parent_segment,
            base,
            reopened,
            "Created branch"
        );
        self.notify(child.path());
        Ok(child)
    }

    /// Delete the branch at `path`.
    ///
    /// Children keep their records. Store-level resolution of the deleted
    /// branch fails from now on.
    ///
    /// # Errors
    /// - [`BranchError::BranchNotFound`] if no branch exists at `path`
    /// - [`BranchError::BadRequest`] for `MAIN` or an already deleted branch
    pub fn delete(&self, path: &str) -> Result<Branch> {
        let _structure = self.inner.structure.lock();
        let branch = self.get_branch(path)?;
        if branch.is_deleted() {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: "branch is already deleted".to_string(),
            }
            .into());
        }
        branch.delete()?;

        let deleted = self.update_record(path, Script::WithDeleted, Params::new())?;
        info!(branch = %path, "Deleted branch");
        self.notify(path);
        Ok(deleted)
    }

    /// Record a commit on the branch at `path`.
    ///
    /// Heads only move forward: a commit older than the current head leaves
    /// the branch unchanged. For `MAIN` the relative state stays `UP_TO_DATE`.
    ///
    /// # Errors
    /// - [`BranchError::BranchNotFound`] if no branch exists at `path`
    /// - [`BranchError::BadRequest`] if the branch is deleted
    pub fn handle_commit(&self, path: &str, timestamp: Timestamp) -> Result<Branch> {
        let branch = self.get_branch(path)?;
        if branch.is_deleted() {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: "cannot commit to a deleted branch".to_string(),
            }
            .into());
        }

        let mut params = Params::new();
        params.insert("headTimestamp".to_string(), Value::from(timestamp));
        let updated = self.update_record(path, Script::WithHeadTimestamp, params)?;
        debug!(branch = %path, head = updated.head_timestamp(), "Handled commit");
        self.notify(path);
        Ok(updated)
    }

    /// Replace the metadata of the branch at `path`.
    pub fn update_metadata(&self, path: &str, metadata: Metadata) -> Result<Branch> {
        self.get_branch(path)?;
        let mut params = Params::new();
        params.insert("metadata".to_string(), Value::Object(metadata));
        let updated = self.update_record(path, Script::WithMetadata, params)?;
        debug!(branch = %path, "Updated branch metadata");
        self.notify(path);
        Ok(updated)
    }

    /// State of the branch at `path` relative to its parent.
    pub fn branch_state(&self, path: &str) -> Result<BranchState> {
        let branch = self.get_branch(path)?;
        let parent = self.parent(&branch)?;
        Ok(BranchState::between(&branch, &parent))
    }

    /// State of the branch at `left` relative to the branch at `right`.
    pub fn branch_state_against(&self, left: &str, right: &str) -> Result<BranchState> {
        Ok(BranchState::between(
            &self.get_branch(left)?,
            &self.get_branch(right)?,
        ))
    }

    /// Resolve the store-level segment view of the branch at `path`.
    ///
    /// # Errors
    /// Returns [`BranchError::InvalidArgument`] if the branch is deleted or
    /// has no segment bookkeeping.
    pub fn store_branch(&self, path: &str) -> Result<SegmentView> {
        let branch = self.get_branch(path)?;
        if branch.is_deleted() {
            return Err(BranchError::InvalidArgument {
                path: path.to_string(),
                reason: "branch is deleted".to_string(),
            }
            .into());
        }
        Ok(SegmentView::from(self.segment_info_of(&branch)?))
    }

    /// The revision-level reference of the branch at `path`, with its chain
    /// of base points back to `MAIN`.
    ///
    /// The chain stops at an ancestor that was re-forked after this branch
    /// was created, since that ancestor's current history is not the one this
    /// branch inherited.
    pub fn branch_ref(&self, path: &str) -> Result<BranchRef> {
        let branches = self.inner.branches.read();
        Self::branch_ref_in(&branches, path)
    }

    fn branch_ref_in(branches: &HashMap<String, Branch>, path: &str) -> Result<BranchRef> {
        let branch = branches.get(path).ok_or_else(|| BranchError::BranchNotFound {
            path: path.to_string(),
        })?;
        let id = branch
            .segment_info()
            .map_or(MAIN_BRANCH_ID, |info| info.store_branch_id);
        if branch.is_main() {
            return Ok(BranchRef::main_with_id(id));
        }

        let base = match branches.get(branch.parent_path()) {
            Some(parent) if parent.base_timestamp() <= branch.base_timestamp() => {
                let parent_ref = Self::branch_ref_in(branches, parent.path())?;
                Some(BranchPoint::new(parent_ref, branch.base_timestamp()))
            }
            _ => None,
        };
        Ok(BranchRef::new(id, branch.path(), base))
    }

    /// Register a listener for branch changes.
    pub fn add_change_listener(&self, listener: Arc<dyn BranchChangeListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Begin a two-phase rebase of the branch at `path` onto `new_parent`.
    ///
    /// See [`StagedRebase`] for the protocol. The tree structure lock is held
    /// until the returned rebase is committed or aborted.
    ///
    /// # Errors
    /// - [`BranchError::BadRequest`] for `MAIN`, deleted branches, or a
    ///   target that is not the branch's current parent
    /// - errors from the interrupt checkpoint or the stage callback; nothing
    ///   has been changed when these are returned
    pub fn stage_rebase<'a, C: RebaseCallbacks>(
        &'a self,
        path: &str,
        new_parent: &str,
        callbacks: &'a mut C,
    ) -> Result<StagedRebase<'a, C>> {
        let guard = self.inner.structure.lock();
        let source = self.get_branch(path)?;
        let parent = self.get_branch(new_parent)?;
        if source.is_main() {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: "MAIN cannot be rebased".to_string(),
            }
            .into());
        }
        if source.is_deleted() || parent.is_deleted() {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: "cannot rebase a deleted branch or onto a deleted branch".to_string(),
            }
            .into());
        }
        if source.parent_path() != new_parent {
            return Err(BranchError::BadRequest {
                path: path.to_string(),
                reason: format!(
                    "can only rebase onto the current parent '{}', not '{new_parent}'",
                    source.parent_path()
                ),
            }
            .into());
        }

        StagedRebase::begin(self, guard, source, callbacks)
    }

    /// Run a complete rebase of the branch at `path` onto `new_parent`.
    ///
    /// On failure the staged state is discarded and the branch is left as it
    /// was before the call.
    pub fn rebase<C: RebaseCallbacks>(
        &self,
        path: &str,
        new_parent: &str,
        callbacks: &mut C,
    ) -> Result<Branch> {
        self.stage_rebase(path, new_parent, callbacks)?.commit()
    }

    pub(super) fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub(super) fn allocate_segment(&self) -> super::SegmentId {
        self.inner.segments.allocate()
    }

    pub(super) fn next_store_branch_id(&self) -> i32 {
        self.inner.next_store_branch_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn segment_info_of<'b>(&self, branch: &'b Branch) -> Result<&'b SegmentInfo> {
        branch.segment_info().ok_or_else(|| {
            BranchError::InvalidArgument {
                path: branch.path().to_string(),
                reason: "branch has no segment bookkeeping".to_string(),
            }
            .into()
        })
    }

    /// Write the rebased branch and its advanced parent, called by the rebase
    /// protocol while it still holds the structure lock.
    ///
    /// Both records are changed through partial update scripts, so metadata
    /// or head updates that landed after `staged_head` was read survive.
    pub(super) fn install_rebased(
        &self,
        rebased: &Branch,
        staged_head: Timestamp,
        parent_segment: super::SegmentId,
    ) -> Result<Branch> {
        let mut branches = self.inner.branches.write();
        let parent_path = rebased.parent_path();
        let parent = branches
            .get(parent_path)
            .cloned()
            .ok_or_else(|| BranchError::BranchNotFound {
                path: parent_path.to_string(),
            })?;
        let advance = segments_update(parent_path, &self.segment_info_of(&parent)?.advanced(parent_segment));

        self.inner
            .store
            .write_all(&[rebase_update(rebased, staged_head)?, advance])?;
        self.refresh(&mut branches, &[parent_path, rebased.path()])?;
        let installed = branches
            .get(rebased.path())
            .cloned()
            .ok_or_else(|| BranchError::BranchNotFound {
                path: rebased.path().to_string(),
            })?;
        drop(branches);

        self.notify(installed.path());
        Ok(installed)
    }

    /// Re-read the records at `paths` from the store into the index.
    fn refresh(&self, branches: &mut HashMap<String, Branch>, paths: &[&str]) -> Result<()> {
        for path in paths {
            let stored = self.inner.store.get(path)?.ok_or_else(|| {
                BranchError::BranchNotFound {
                    path: path.to_string(),
                }
            })?;
            branches.insert(path.to_string(), stored);
        }
        Ok(())
    }

    /// Apply a scripted partial update and refresh the index from the store.
    ///
    /// The index write lock is held across the store update and the re-read
    /// so concurrent updates of different fields both end up in the index.
    fn update_record(&self, path: &str, script: Script, params: Params) -> Result<Branch> {
        let mut branches = self.inner.branches.write();
        self.inner.store.update(path, script, &params)?;
        let updated = self.inner.store.get(path)?.ok_or_else(|| {
            BranchError::BranchNotFound {
                path: path.to_string(),
            }
        })?;
        branches.insert(path.to_string(), updated.clone());
        Ok(updated)
    }

    fn notify(&self, path: &str) {
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener.branch_changed(path);
        }
    }
}

fn segments_update(path: &str, info: &SegmentInfo) -> Write {
    let mut params = Params::new();
    params.insert("segmentId".to_string(), Value::from(info.segment_id));
    params.insert(
        "segments".to_string(),
        Value::from(info.segments.iter().copied().collect::<Vec<_>>()),
    );
    Write::Update {
        path: path.to_string(),
        script: Script::WithSegments,
        params,
    }
}

fn rebase_update(rebased: &Branch, staged_head: Timestamp) -> Result<Write> {
    let info = rebased.segment_info().ok_or_else(|| BranchError::InvalidArgument {
        path: rebased.path().to_string(),
        reason: "rebased branch has no segment bookkeeping".to_string(),
    })?;
    let encode = |value: serde_json::Result<Value>| {
        value.map_err(|source| StoreError::SerializationFailed { source })
    };
    let mut params = match encode(serde_json::to_value(info))? {
        Value::Object(params) => params,
        _ => Params::new(),
    };
    params.insert("type".to_string(), encode(serde_json::to_value(rebased.kind()))?);
    params.insert("baseTimestamp".to_string(), Value::from(rebased.base_timestamp()));
    params.insert("headTimestamp".to_string(), Value::from(rebased.head_timestamp()));
    params.insert("stagedHeadTimestamp".to_string(), Value::from(staged_head));
    Ok(Write::Update {
        path: rebased.path().to_string(),
        script: Script::WithRebase,
        params,
    })
}

impl RevisionBranchProvider for BranchManager {
    fn get_branch(&self, path: &str) -> Result<SegmentView> {
        self.store_branch(path)
    }

    fn get_parent_branch(&self, path: &str) -> Result<SegmentView> {
        let branch = BranchManager::get_branch(self, path)?;
        let parent = self.parent(&branch)?;
        self.store_branch(parent.path())
    }
}
