//! In-memory revision storage keyed by segment.
//!
//! Every revision is written to exactly one segment, and every segment is
//! owned by one store-level branch. A branch sees the revisions held in its
//! visible segments, so history written before a fork stays readable from
//! the child even after the parent moves on or is rebased.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{
    BranchPoint, BranchVersion, ListElement, ObjectId, ObjectType, Revision, RevisionBranchProvider,
    RevisionError, RevisionInfo, RevisionLoader,
};
use crate::{Result, Timestamp};
use crate::branch::{SegmentId, SegmentView};
use crate::constants::UNSPECIFIED_DATE;

struct Segment {
    /// Store-level id of the branch owning the segment.
    owner: i32,
    /// Revisions per object, oldest first.
    revisions: HashMap<ObjectId, Vec<Revision>>,
}

/// Revision storage for one repository.
pub struct InMemoryRevisionStore {
    branches: Arc<dyn RevisionBranchProvider>,
    segments: RwLock<HashMap<SegmentId, Segment>>,
    types: RwLock<HashMap<ObjectId, Arc<ObjectType>>>,
}

impl std::fmt::Debug for InMemoryRevisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRevisionStore")
            .field("segments", &self.segments.read().len())
            .field("objects", &self.types.read().len())
            .finish()
    }
}

impl InMemoryRevisionStore {
    pub fn new(branches: Arc<dyn RevisionBranchProvider>) -> Self {
        Self {
            branches,
            segments: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Write `revision` to `segment`.
    ///
    /// The current revision of the same object on the same branch, if any,
    /// is closed at `revision.created() - 1`.
    pub fn write(&self, segment: SegmentId, revision: Revision) -> Result<()> {
        let id = revision.id().clone();
        let branch = revision.branch().id();

        let mut segments = self.segments.write();
        if let Some(existing) = segments.get(&segment) {
            if existing.owner != branch {
                return Err(RevisionError::BranchMismatch {
                    id,
                    expected: existing.owner,
                    actual: branch,
                }
                .into());
            }
        }
        {
            let mut types = self.types.write();
            let known = types.entry(id.clone()).or_insert_with(|| revision.object_type().clone());
            if known.name() != revision.object_type().name() {
                return Err(RevisionError::ObjectTypeMismatch {
                    id,
                    expected: known.name().to_string(),
                    actual: revision.object_type().name().to_string(),
                }
                .into());
            }
        }

        for owned in segments.values().filter(|s| s.owner == branch) {
            if let Some(current) = owned
                .revisions
                .get(&id)
                .and_then(|list| list.iter().find(|r| !r.is_historical()))
            {
                current.set_revised(revision.created() - 1);
            }
        }

        debug!(id = %id, branch = %revision.branch(), version = revision.version(), segment, "Stored revision");
        segments
            .entry(segment)
            .or_insert_with(|| Segment {
                owner: branch,
                revisions: HashMap::new(),
            })
            .revisions
            .entry(id)
            .or_default()
            .push(revision);
        Ok(())
    }

    /// Drop a segment and everything written to it.
    pub fn discard_segment(&self, segment: SegmentId) -> usize {
        let removed = self
            .segments
            .write()
            .remove(&segment)
            .map_or(0, |s| s.revisions.values().map(Vec::len).sum());
        debug!(segment, removed, "Discarded segment");
        removed
    }

    /// The revision of `id` readable at `timestamp` through `segments`.
    ///
    /// This is the revision with the latest `created` not after `timestamp`;
    /// [`UNSPECIFIED_DATE`] reads the newest one. Detached revisions are
    /// returned as well.
    pub fn visible(&self, id: &ObjectId, segments: &BTreeSet<SegmentId>, timestamp: Timestamp) -> Option<Revision> {
        let store = self.segments.read();
        segments
            .iter()
            .filter_map(|seg| Some((*seg, store.get(seg)?.revisions.get(id)?)))
            .flat_map(|(seg, list)| list.iter().map(move |r| (seg, r)))
            .filter(|(_, r)| timestamp == UNSPECIFIED_DATE || r.created() <= timestamp)
            .max_by_key(|(seg, r)| (r.created(), *seg))
            .map(|(_, r)| r.clone())
    }

    /// Every revision of `id` readable through `segments`, newest first.
    pub fn history(&self, id: &ObjectId, segments: &BTreeSet<SegmentId>) -> Vec<Revision> {
        let store = self.segments.read();
        let mut all: Vec<(SegmentId, Revision)> = segments
            .iter()
            .filter_map(|seg| Some((*seg, store.get(seg)?.revisions.get(id)?)))
            .flat_map(|(seg, list)| list.iter().map(move |r| (seg, r.clone())))
            .collect();
        all.sort_by_key(|(seg, r)| std::cmp::Reverse((r.created(), *seg)));
        all.into_iter().map(|(_, r)| r).collect()
    }

    /// The newest revision of every object written to `segments`.
    pub fn latest_in(&self, segments: &BTreeSet<SegmentId>) -> Vec<Revision> {
        let store = self.segments.read();
        let mut latest: HashMap<&ObjectId, (SegmentId, &Revision)> = HashMap::new();
        for seg in segments {
            let Some(segment) = store.get(seg) else {
                continue;
            };
            for (id, list) in &segment.revisions {
                let Some(newest) = list.last() else {
                    continue;
                };
                let entry = latest.entry(id).or_insert((*seg, newest));
                if (newest.created(), *seg) > (entry.1.created(), entry.0) {
                    *entry = (*seg, newest);
                }
            }
        }
        let mut out: Vec<Revision> = latest.into_values().map(|(_, r)| r.clone()).collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// The type recorded for `id`.
    pub fn object_type(&self, id: &ObjectId) -> Option<Arc<ObjectType>> {
        self.types.read().get(id).cloned()
    }

    /// Number of stored revisions.
    pub fn len(&self) -> usize {
        self.segments
            .read()
            .values()
            .flat_map(|s| s.revisions.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replace list elements past `chunk_size` with proxies.
fn chunked(revision: &Revision, chunk_size: i32) -> Revision {
    let mut copy = revision.clone();
    let Ok(chunk) = usize::try_from(chunk_size) else {
        return copy;
    };
    if chunk == 0 {
        return copy;
    }
    let lists: Vec<String> = copy
        .object_type()
        .features()
        .iter()
        .filter(|f| f.is_many())
        .map(|f| f.name().to_string())
        .collect();
    for name in lists {
        if copy.list(&name).len() <= chunk {
            continue;
        }
        for (index, element) in copy.list_mut(&name).iter_mut().enumerate().skip(chunk) {
            *element = ListElement::Proxy { index };
        }
    }
    copy
}

impl RevisionLoader for InMemoryRevisionStore {
    fn load_revision_by_version(
        &self,
        id: &ObjectId,
        branch_version: &BranchVersion,
        chunk_size: i32,
    ) -> Result<Option<Revision>> {
        let branch = branch_version.branch().id();
        let store = self.segments.read();
        Ok(store
            .values()
            .filter(|s| s.owner == branch)
            .filter_map(|s| s.revisions.get(id))
            .flatten()
            .find(|r| r.version() == branch_version.version())
            .map(|r| chunked(r, chunk_size)))
    }

    fn load_revisions(
        &self,
        infos: &[RevisionInfo],
        branch_point: &BranchPoint,
        chunk_size: i32,
        _prefetch_depth: i32,
    ) -> Result<Vec<Option<Revision>>> {
        let SegmentView { segments, .. } = self.branches.get_branch(branch_point.branch().path())?;
        Ok(infos
            .iter()
            .map(|info| {
                self.visible(info.id(), &segments, branch_point.timestamp())
                    .map(|r| chunked(&r, chunk_size))
            })
            .collect())
    }
}
