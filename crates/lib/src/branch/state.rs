//! Relative branch state.

use serde::{Deserialize, Serialize};

use super::Branch;

/// The state of a branch relative to another branch, usually its parent.
///
/// The state is never stored. It is derived by comparing base and head
/// timestamps of the two branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    /// Neither side has commits since the fork point.
    UpToDate,
    /// Only the branch has commits since the fork point.
    Forward,
    /// Only the other side has commits since the fork point.
    Stale,
    /// Both sides have commits since the fork point.
    Diverged,
}

impl BranchState {
    /// Derive the state of `left` compared to `right`.
    ///
    /// The root branch is always [`BranchState::UpToDate`] relative to itself.
    pub fn between(left: &Branch, right: &Branch) -> Self {
        if left.path() == right.path() {
            return BranchState::UpToDate;
        }

        let left_changed = left.head_timestamp() > left.base_timestamp();
        let right_changed = right.head_timestamp() > left.base_timestamp();
        match (left_changed, right_changed) {
            (false, false) => BranchState::UpToDate,
            (true, false) => BranchState::Forward,
            (false, true) => BranchState::Stale,
            (true, true) => BranchState::Diverged,
        }
    }
}

impl std::fmt::Display for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BranchState::UpToDate => "UP_TO_DATE",
            BranchState::Forward => "FORWARD",
            BranchState::Stale => "STALE",
            BranchState::Diverged => "DIVERGED",
        };
        f.write_str(name)
    }
}
