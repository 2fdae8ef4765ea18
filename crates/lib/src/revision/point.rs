//! Branch references, branch points and branch versions.
//!
//! These are the revision layer's view of a branch: a store-level branch id,
//! its path for diagnostics, and the point on its parent it was forked from.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::Timestamp;
use crate::constants::{MAIN_BRANCH_ID, MAIN_PATH, UNSPECIFIED_DATE};

/// A cheap, shareable reference to a branch.
///
/// Equality and hashing only consider the store-level branch id.
#[derive(Clone)]
pub struct BranchRef {
    inner: Arc<BranchRefInner>,
}

struct BranchRefInner {
    id: i32,
    path: String,
    base: Option<BranchPoint>,
}

impl BranchRef {
    /// The root branch.
    pub fn main() -> Self {
        Self::main_with_id(MAIN_BRANCH_ID)
    }

    /// The root branch with an explicit store-level id.
    pub fn main_with_id(id: i32) -> Self {
        Self::new(id, MAIN_PATH, None)
    }

    /// A branch forked from `base`.
    pub fn new(id: i32, path: impl Into<String>, base: Option<BranchPoint>) -> Self {
        Self {
            inner: Arc::new(BranchRefInner {
                id,
                path: path.into(),
                base,
            }),
        }
    }

    /// The store-level branch id.
    pub fn id(&self) -> i32 {
        self.inner.id
    }

    /// The branch path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The point on the parent this branch was forked from.
    ///
    /// `None` for `MAIN`, and for branches whose inherited history is not
    /// reachable through the parent's current incarnation.
    pub fn base(&self) -> Option<&BranchPoint> {
        self.inner.base.as_ref()
    }

    /// Whether this is the root branch.
    pub fn is_main(&self) -> bool {
        self.inner.path == MAIN_PATH
    }

    /// The state of this branch at `timestamp`.
    pub fn point(&self, timestamp: Timestamp) -> BranchPoint {
        BranchPoint::new(self.clone(), timestamp)
    }

    /// The current state of this branch.
    pub fn head(&self) -> BranchPoint {
        self.point(UNSPECIFIED_DATE)
    }

    /// Version `version` of an object on this branch.
    pub fn version(&self, version: i32) -> BranchVersion {
        BranchVersion::new(self.clone(), version)
    }
}

impl PartialEq for BranchRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for BranchRef {}

impl Hash for BranchRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for BranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Branch[{}, {}]", self.inner.id, self.inner.path)
    }
}

impl std::fmt::Display for BranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.path)
    }
}

/// A `(branch, timestamp)` pair naming an exact state to read.
///
/// A timestamp of [`UNSPECIFIED_DATE`] means the branch head.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchPoint {
    branch: BranchRef,
    timestamp: Timestamp,
}

impl BranchPoint {
    /// Create a branch point.
    pub fn new(branch: BranchRef, timestamp: Timestamp) -> Self {
        Self { branch, timestamp }
    }

    /// The branch.
    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    /// The timestamp, or [`UNSPECIFIED_DATE`] for the head.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whether this point names the branch head.
    pub fn is_head(&self) -> bool {
        self.timestamp == UNSPECIFIED_DATE
    }
}

/// A `(branch, version)` pair naming one exact revision of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchVersion {
    branch: BranchRef,
    version: i32,
}

impl BranchVersion {
    /// Create a branch version.
    pub fn new(branch: BranchRef, version: i32) -> Self {
        Self { branch, version }
    }

    /// The branch.
    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    /// The version number.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The preceding version on the same branch.
    pub fn previous(&self) -> BranchVersion {
        BranchVersion::new(self.branch.clone(), self.version - 1)
    }
}
