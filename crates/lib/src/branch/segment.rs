//! Segment allocation.
//!
//! A segment is an integer naming a contiguous slice of one branch's own
//! commit history. Every revision is written into exactly one segment, and a
//! branch sees a revision iff the revision's segment is in the branch's own or
//! inherited segment set. This turns "is this revision visible to me" into a
//! set lookup instead of an ancestor walk.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of a history segment.
pub type SegmentId = i32;

/// Hands out strictly increasing segment identifiers.
///
/// The allocator is the only source of segment ids for a branch tree, so two
/// concurrent branch creations never receive the same id. Its state is a
/// single counter that can be re-derived from the persisted branch records
/// (see [`SegmentAllocator::starting_after`]).
#[derive(Debug)]
pub struct SegmentAllocator {
    next: AtomicI32,
}

impl SegmentAllocator {
    /// Create an allocator whose first id is `next`.
    pub fn new(next: SegmentId) -> Self {
        Self {
            next: AtomicI32::new(next),
        }
    }

    /// Create an allocator that continues after the highest id in use.
    pub fn starting_after<'a>(in_use: impl IntoIterator<Item = &'a SegmentId>) -> Self {
        let next = in_use.into_iter().max().map_or(0, |max| max + 1);
        Self::new(next)
    }

    /// Allocate the next segment id.
    pub fn allocate(&self) -> SegmentId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to [`allocate`](Self::allocate) will return.
    pub fn peek(&self) -> SegmentId {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for SegmentAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// The segment bookkeeping of a store-backed branch.
///
/// `segments` and `parent_segments` are disjoint. `segment_id` is the
/// segment new commits on the branch are written to and is always a member
/// of `segments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    /// Segment receiving the branch's current writes.
    pub segment_id: SegmentId,
    /// Segments holding the branch's own history.
    pub segments: BTreeSet<SegmentId>,
    /// Segments inherited from the ancestor chain, frozen at fork time.
    pub parent_segments: BTreeSet<SegmentId>,
    /// Store-level branch identifier.
    #[serde(rename = "cdoBranchId")]
    pub store_branch_id: i32,
}

impl SegmentInfo {
    /// Segment info of a freshly forked branch.
    pub fn forked(
        segment_id: SegmentId,
        parent_segments: BTreeSet<SegmentId>,
        store_branch_id: i32,
    ) -> Self {
        Self {
            segment_id,
            segments: BTreeSet::from([segment_id]),
            parent_segments,
            store_branch_id,
        }
    }

    /// All segments visible from this branch.
    pub fn visible(&self) -> BTreeSet<SegmentId> {
        self.segments.union(&self.parent_segments).copied().collect()
    }

    /// Whether a revision written to `segment` is visible from this branch.
    pub fn is_visible(&self, segment: SegmentId) -> bool {
        self.segments.contains(&segment) || self.parent_segments.contains(&segment)
    }

    /// Switch writes to a new own segment, keeping the old ones as history.
    pub fn advanced(&self, segment_id: SegmentId) -> Self {
        let mut next = self.clone();
        next.segment_id = segment_id;
        next.segments.insert(segment_id);
        next
    }

    /// The segments a child forked right now would inherit.
    pub fn inheritable(&self) -> BTreeSet<SegmentId> {
        self.visible()
    }
}

/// The `(segment, segment set)` pair a revision branch provider hands out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentView {
    /// Segment receiving current writes.
    pub segment: SegmentId,
    /// Every segment visible from the branch.
    pub segments: BTreeSet<SegmentId>,
}

impl From<&SegmentInfo> for SegmentView {
    fn from(info: &SegmentInfo) -> Self {
        Self {
            segment: info.segment_id,
            segments: info.visible(),
        }
    }
}
