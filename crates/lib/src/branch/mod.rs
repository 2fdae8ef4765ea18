//! The branch tree.
//!
//! A branch is a named, cheaply created line of history forked from a parent
//! branch. Branches form a tree rooted at `MAIN`; a branch's path is its
//! parent's path, a `/`, and its name.
//!
//! [`Branch`] values are immutable by convention: every mutation
//! (`with_head_timestamp`, `with_metadata`, `delete`) yields a new value with
//! the same path. Store-backed branches additionally carry [`SegmentInfo`],
//! which the [`BranchManager`] assigns when a branch is created or rebased.

mod errors;
mod manager;
mod rebase;
mod segment;
mod state;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use errors::BranchError;
pub use manager::{BranchChangeListener, BranchManager};
pub use rebase::{RebaseCallbacks, RebasePhase, StagedRebase};
pub use segment::{SegmentAllocator, SegmentId, SegmentInfo, SegmentView};
pub use state::BranchState;

use crate::constants::{MAIN_PATH, MAX_BRANCH_NAME_LENGTH, SEPARATOR, STAGING_MARKER};
use crate::{Result, Timestamp};

/// Free-form branch metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The persisted `type` discriminator of a branch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    /// The root branch without segment bookkeeping.
    #[serde(rename = "MainBranch")]
    Main,
    /// A child branch without segment bookkeeping.
    #[serde(rename = "Branch")]
    Child,
    /// The store-backed root branch.
    #[serde(rename = "SegmentedMainBranch")]
    SegmentedMain,
    /// A store-backed child branch.
    #[serde(rename = "SegmentedBranch")]
    Segmented,
}

/// One branch of the tree.
///
/// Serializes to the stable record shape
/// `{type, name, parentPath, baseTimestamp, headTimestamp, deleted, metadata, path}`,
/// with `{segmentId, segments, parentSegments, cdoBranchId}` appended for
/// store-backed branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    #[serde(rename = "type")]
    kind: BranchKind,
    name: String,
    parent_path: String,
    base_timestamp: Timestamp,
    head_timestamp: Timestamp,
    deleted: bool,
    #[serde(default)]
    metadata: Metadata,
    path: String,
    #[serde(flatten)]
    segment_info: Option<SegmentInfo>,
}

impl Branch {
    /// Create the root branch.
    ///
    /// # Errors
    /// Returns [`BranchError::BadRequest`] for a negative base timestamp.
    pub fn main(base_timestamp: Timestamp) -> Result<Self> {
        if base_timestamp < 0 {
            return Err(BranchError::BadRequest {
                path: MAIN_PATH.to_string(),
                reason: format!("base timestamp may not be negative, was {base_timestamp}"),
            }
            .into());
        }

        Ok(Self {
            kind: BranchKind::Main,
            name: MAIN_PATH.to_string(),
            parent_path: String::new(),
            base_timestamp,
            head_timestamp: base_timestamp,
            deleted: false,
            metadata: Metadata::new(),
            path: MAIN_PATH.to_string(),
            segment_info: None,
        })
    }

    /// Create a child of this branch, forked at `base_timestamp`.
    ///
    /// # Errors
    /// - [`BranchError::InvalidName`] if `name` is not a valid branch name
    /// - [`BranchError::BadRequest`] if this branch is deleted
    pub fn child(
        &self,
        name: &str,
        metadata: Metadata,
        base_timestamp: Timestamp,
    ) -> Result<Self> {
        validate_name(name)?;
        if self.deleted {
            return Err(BranchError::BadRequest {
                path: self.path.clone(),
                reason: format!("cannot create child '{name}' under a deleted branch"),
            }
            .into());
        }

        Ok(Self {
            kind: BranchKind::Child,
            name: name.to_string(),
            parent_path: self.path.clone(),
            base_timestamp,
            head_timestamp: base_timestamp,
            deleted: false,
            metadata,
            path: to_absolute_path(&self.path, name),
            segment_info: None,
        })
    }

    /// A copy of this branch with the head moved to `timestamp`.
    pub fn with_head_timestamp(&self, timestamp: Timestamp) -> Self {
        Self {
            head_timestamp: timestamp,
            ..self.clone()
        }
    }

    /// A copy of this branch with the given metadata.
    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }

    /// A copy of this branch carrying the given segment bookkeeping.
    pub fn with_segments(&self, info: SegmentInfo) -> Self {
        let kind = if self.is_main() {
            BranchKind::SegmentedMain
        } else {
            BranchKind::Segmented
        };
        Self {
            kind,
            segment_info: Some(info),
            ..self.clone()
        }
    }

    /// A copy of this branch re-forked at `base_timestamp`.
    pub(crate) fn with_base(&self, base_timestamp: Timestamp) -> Self {
        Self {
            base_timestamp,
            head_timestamp: base_timestamp,
            ..self.clone()
        }
    }

    /// An unlisted scratch child of this branch, used to hold staged content
    /// while this branch is rebased. Its name carries [`STAGING_MARKER`] and
    /// is never accepted by [`validate_name`].
    pub(crate) fn staging(&self, segment_info: SegmentInfo) -> Self {
        let name = format!("{}{STAGING_MARKER}-{}", self.name, Uuid::new_v4().simple());
        Self {
            kind: BranchKind::Segmented,
            path: to_absolute_path(&self.path, &name),
            name,
            parent_path: self.path.clone(),
            base_timestamp: self.head_timestamp,
            head_timestamp: self.head_timestamp,
            deleted: false,
            metadata: Metadata::new(),
            segment_info: Some(segment_info),
        }
    }

    /// A deleted copy of this branch.
    ///
    /// # Errors
    /// Returns [`BranchError::BadRequest`] for the root branch.
    pub fn delete(&self) -> Result<Self> {
        if self.is_main() {
            return Err(BranchError::BadRequest {
                path: self.path.clone(),
                reason: "MAIN cannot be deleted".to_string(),
            }
            .into());
        }
        Ok(Self {
            deleted: true,
            ..self.clone()
        })
    }

    /// The persisted record type of this branch.
    pub fn kind(&self) -> BranchKind {
        self.kind
    }

    /// The last segment of the path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full path of the branch.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path of the parent branch; empty for `MAIN`.
    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    /// The point on the parent at which this branch was created.
    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    /// The timestamp of the latest commit on this branch.
    pub fn head_timestamp(&self) -> Timestamp {
        self.head_timestamp
    }

    /// Whether the branch has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Free-form branch metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether this is a rebase staging branch.
    pub fn is_staging(&self) -> bool {
        self.name.contains(STAGING_MARKER)
    }

    /// Whether this is the root branch.
    pub fn is_main(&self) -> bool {
        self.path == MAIN_PATH
    }

    /// Segment bookkeeping, present for store-backed branches.
    pub fn segment_info(&self) -> Option<&SegmentInfo> {
        self.segment_info.as_ref()
    }

    /// The segment receiving this branch's writes.
    pub fn segment_id(&self) -> Option<SegmentId> {
        self.segment_info.as_ref().map(|info| info.segment_id)
    }

    /// How deep the branch sits below `MAIN`.
    pub fn depth(&self) -> usize {
        self.path.matches(SEPARATOR).count()
    }
}

/// Join a parent path and a child name.
pub fn to_absolute_path(parent_path: &str, name: &str) -> String {
    format!("{parent_path}{SEPARATOR}{name}")
}

/// Check that `name` is usable as a branch name.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name may not be empty".to_string())
    } else if name.contains(SEPARATOR) {
        Some(format!("name may not contain '{SEPARATOR}'"))
    } else if name.contains(STAGING_MARKER) {
        Some(format!("name may not contain the reserved '{STAGING_MARKER}' marker"))
    } else if name.chars().count() > MAX_BRANCH_NAME_LENGTH {
        Some(format!(
            "name may not be longer than {MAX_BRANCH_NAME_LENGTH} characters"
        ))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BranchError::InvalidName {
            name: name.to_string(),
            reason,
        }
        .into()),
        None => Ok(()),
    }
}
