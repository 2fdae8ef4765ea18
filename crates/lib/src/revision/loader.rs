//! Contracts between the revision manager and its backing storage.

use std::sync::Arc;

use super::{BranchPoint, BranchVersion, ObjectId, Revision};
use crate::Result;
use crate::branch::SegmentView;

/// Resolves branch paths to the segments holding their history.
pub trait RevisionBranchProvider: Send + Sync {
    /// The segment view of the branch at `path`.
    fn get_branch(&self, path: &str) -> Result<SegmentView>;

    /// The segment view of the parent of the branch at `path`.
    fn get_parent_branch(&self, path: &str) -> Result<SegmentView>;
}

/// What the cache knows about one requested object before loading.
#[derive(Debug, Clone)]
pub enum RevisionInfo {
    /// The cache holds the revision valid at the requested point.
    Available {
        id: ObjectId,
        requested: BranchPoint,
        revision: Arc<Revision>,
    },
    /// The cache only holds a revision at one of the requested branch's base
    /// points. The branch may have changed the object since, so the loader
    /// has the final word.
    Inherited {
        id: ObjectId,
        requested: BranchPoint,
        revision: Arc<Revision>,
    },
    /// Nothing cached.
    Missing { id: ObjectId, requested: BranchPoint },
}

impl RevisionInfo {
    pub fn id(&self) -> &ObjectId {
        match self {
            RevisionInfo::Available { id, .. }
            | RevisionInfo::Inherited { id, .. }
            | RevisionInfo::Missing { id, .. } => id,
        }
    }

    pub fn requested(&self) -> &BranchPoint {
        match self {
            RevisionInfo::Available { requested, .. }
            | RevisionInfo::Inherited { requested, .. }
            | RevisionInfo::Missing { requested, .. } => requested,
        }
    }

    /// The cached candidate, if any.
    pub fn cached(&self) -> Option<&Arc<Revision>> {
        match self {
            RevisionInfo::Available { revision, .. } | RevisionInfo::Inherited { revision, .. } => {
                Some(revision)
            }
            RevisionInfo::Missing { .. } => None,
        }
    }

    /// Whether the loader must be asked for this object.
    pub fn is_load_needed(&self) -> bool {
        !matches!(self, RevisionInfo::Available { .. })
    }
}

/// Loads revisions from the backing store.
///
/// Errors are returned to the caller of the revision manager unchanged.
pub trait RevisionLoader: Send + Sync {
    /// Load one exact version of an object, or `None` if it does not exist.
    ///
    /// With a non-negative `chunk_size`, list elements past the chunk may be
    /// returned as proxies.
    fn load_revision_by_version(
        &self,
        id: &ObjectId,
        branch_version: &BranchVersion,
        chunk_size: i32,
    ) -> Result<Option<Revision>>;

    /// Load the revisions valid at `branch_point` for every info.
    ///
    /// The result is aligned with `infos`: entry `i` is the revision of
    /// `infos[i].id()`, or `None` if the object does not exist at that point.
    /// A returned revision may belong to an ancestor of the requested branch.
    fn load_revisions(
        &self,
        infos: &[RevisionInfo],
        branch_point: &BranchPoint,
        chunk_size: i32,
        prefetch_depth: i32,
    ) -> Result<Vec<Option<Revision>>>;
}
