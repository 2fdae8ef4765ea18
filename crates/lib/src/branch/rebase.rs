//! Two-phase branch rebase.
//!
//! A rebase moves a branch onto the latest state of its parent and replays
//! the branch's own changes on top. It runs in two phases:
//!
//! 1. **Stage**: the branch's pending content is copied into an ephemeral
//!    staging branch. The staging branch is never written to the store nor
//!    listed in the tree, so ordinary lookups can never see it.
//! 2. **Commit or abort**: on commit, the branch receives a fresh segment and
//!    a fresh parent snapshot, the staged content is replayed onto it, and the
//!    new record is written. On abort, or on any failure during commit, the
//!    staged content is discarded in a single cleanup call and the stored
//!    branch record is left untouched.
//!
//! Content handling is delegated to [`RebaseCallbacks`]; this module only
//! drives the branch bookkeeping.

use parking_lot::MutexGuard;
use tracing::{debug, info, warn};

use super::{Branch, BranchManager, SegmentInfo};
use crate::{Result, Timestamp};

/// The phases a rebase passes through. The interrupt checkpoint is invoked
/// at the start of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebasePhase {
    /// Before content is copied into the staging branch.
    Stage,
    /// Before staged content is replayed onto the rebased branch.
    Replay,
    /// Before the rebased branch record is written.
    Commit,
}

impl std::fmt::Display for RebasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RebasePhase::Stage => "stage",
            RebasePhase::Replay => "replay",
            RebasePhase::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Content operations a rebase delegates to the revision layer.
pub trait RebaseCallbacks {
    /// Interrupt hook, called at the start of every phase. Returning an error
    /// aborts the rebase and rolls it back.
    fn checkpoint(&mut self, _phase: RebasePhase) -> Result<()> {
        Ok(())
    }

    /// Copy the pending content of `source` into `staging`.
    fn stage(&mut self, source: &Branch, staging: &Branch) -> Result<()>;

    /// Replay the content held by `staging` onto `rebased`.
    ///
    /// Returns the timestamp of the last replayed commit, if any, which
    /// becomes the head of the rebased branch.
    fn replay(&mut self, staging: &Branch, rebased: &Branch) -> Result<Option<Timestamp>>;

    /// Drop everything written for `staging`, and for `rebased` if the
    /// rebase failed after it was prepared.
    fn discard(&mut self, _staging: &Branch, _rebased: Option<&Branch>) {}
}

/// A rebase that has finished its stage phase.
///
/// Holds the tree structure lock until it is committed, aborted or dropped.
/// Dropping an unfinished rebase aborts it.
pub struct StagedRebase<'a, C: RebaseCallbacks> {
    manager: &'a BranchManager,
    _structure: MutexGuard<'a, ()>,
    callbacks: &'a mut C,
    source: Branch,
    staging: Branch,
    finished: bool,
}

impl<'a, C: RebaseCallbacks> StagedRebase<'a, C> {
    pub(super) fn begin(
        manager: &'a BranchManager,
        structure: MutexGuard<'a, ()>,
        source: Branch,
        callbacks: &'a mut C,
    ) -> Result<Self> {
        callbacks.checkpoint(RebasePhase::Stage)?;

        let info = manager.segment_info_of(&source)?;
        let staging = source.staging(SegmentInfo::forked(
            manager.allocate_segment(),
            info.visible(),
            manager.next_store_branch_id(),
        ));

        let rebase = Self {
            manager,
            _structure: structure,
            callbacks,
            source,
            staging,
            finished: false,
        };
        rebase.callbacks.stage(&rebase.source, &rebase.staging)?;
        debug!(
            branch = %rebase.source.path(),
            staging = %rebase.staging.path(),
            "Staged rebase"
        );
        Ok(rebase)
    }

    /// The branch being rebased, as it was when the rebase started.
    pub fn source(&self) -> &Branch {
        &self.source
    }

    /// The ephemeral staging branch.
    pub fn staging(&self) -> &Branch {
        &self.staging
    }

    /// Finish the rebase.
    ///
    /// # Errors
    /// Any error from the callbacks or the store. The staged and replayed
    /// content is discarded before the error is returned and the branch
    /// record is unchanged.
    pub fn commit(mut self) -> Result<Branch> {
        self.finished = true;
        let mut prepared = None;
        let result = self.run(&mut prepared);
        match &result {
            Ok(rebased) => {
                self.callbacks.discard(&self.staging, None);
                info!(
                    branch = %rebased.path(),
                    segment = ?rebased.segment_id(),
                    base = rebased.base_timestamp(),
                    "Rebased branch"
                );
            }
            Err(err) => {
                warn!(branch = %self.source.path(), error = %err, "Rebase failed, rolling back");
                self.callbacks.discard(&self.staging, prepared.as_ref());
            }
        }
        result
    }

    /// Abandon the rebase and discard the staged content.
    pub fn abort(mut self) {
        self.finished = true;
        warn!(branch = %self.source.path(), "Rebase aborted");
        self.callbacks.discard(&self.staging, None);
    }

    fn run(&mut self, prepared: &mut Option<Branch>) -> Result<Branch> {
        self.callbacks.checkpoint(RebasePhase::Replay)?;

        let parent_path = self.source.parent_path().to_string();
        let parent = self.manager.get_branch(&parent_path)?;
        let parent_info = self.manager.segment_info_of(&parent)?;
        let base = self
            .manager
            .clock()
            .now_millis()
            .max(parent.head_timestamp());
        let segment = self.manager.allocate_segment();
        let parent_segment = self.manager.allocate_segment();

        let rebased = self
            .source
            .with_base(base)
            .with_segments(SegmentInfo::forked(
                segment,
                parent_info.inheritable(),
                self.manager.next_store_branch_id(),
            ));
        *prepared = Some(rebased.clone());

        let rebased = match self.callbacks.replay(&self.staging, &rebased)? {
            Some(head) if head > rebased.head_timestamp() => rebased.with_head_timestamp(head),
            _ => rebased,
        };
        *prepared = Some(rebased.clone());

        self.callbacks.checkpoint(RebasePhase::Commit)?;
        self.manager
            .install_rebased(&rebased, self.source.head_timestamp(), parent_segment)
    }
}

impl<C: RebaseCallbacks> Drop for StagedRebase<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(branch = %self.source.path(), "Unfinished rebase dropped, discarding staged state");
            self.callbacks.discard(&self.staging, None);
        }
    }
}
