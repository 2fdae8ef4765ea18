//! Branch tree error types.
//!
//! Structured errors for branch lifecycle operations: creation, deletion,
//! rebase and store-level branch resolution.

use thiserror::Error;

/// Errors that can occur during branch tree operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BranchError {
    /// No branch exists at the given path.
    #[error("Branch not found: {path}")]
    BranchNotFound {
        /// The path that was looked up
        path: String,
    },

    /// A live branch already exists at the given path.
    #[error("Branch already exists: {path}")]
    AlreadyExists {
        /// The path of the existing branch
        path: String,
    },

    /// The operation is not allowed on the branch in its current state.
    #[error("Bad request on branch {path}: {reason}")]
    BadRequest {
        /// The branch the operation targeted
        path: String,
        /// Why the request was rejected
        reason: String,
    },

    /// The branch cannot be resolved to store-level identifiers.
    #[error("Invalid branch argument {path}: {reason}")]
    InvalidArgument {
        /// The branch that could not be resolved
        path: String,
        /// Why the branch is not resolvable
        reason: String,
    },

    /// The branch name is not acceptable.
    #[error("Invalid branch name '{name}': {reason}")]
    InvalidName {
        /// The rejected name
        name: String,
        /// Which rule the name violates
        reason: String,
    },

    /// A rebase was interrupted by its interrupt hook.
    #[error("Rebase of {path} interrupted during {phase}")]
    Interrupted {
        /// The branch being rebased
        path: String,
        /// The phase in which the interrupt fired
        phase: String,
    },

    /// Concurrent changes on both sides of a rebase could not be reconciled.
    #[error("Rebase conflict on {path}: {reason}")]
    Conflict {
        /// The branch being rebased
        path: String,
        /// Description of the conflicting change
        reason: String,
    },
}

impl BranchError {
    /// Check if this error indicates the branch was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BranchError::BranchNotFound { .. })
    }

    /// Check if this error indicates the branch already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, BranchError::AlreadyExists { .. })
    }

    /// Check if this error indicates a rejected request.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            BranchError::BadRequest { .. } | BranchError::InvalidName { .. }
        )
    }

    /// Check if this error indicates an unresolvable branch.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, BranchError::InvalidArgument { .. })
    }

    /// Check if this error indicates an interrupted rebase.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BranchError::Interrupted { .. })
    }

    /// Check if this error indicates a rebase conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BranchError::Conflict { .. })
    }

    /// Get the branch path this error is about.
    pub fn path(&self) -> &str {
        match self {
            BranchError::BranchNotFound { path }
            | BranchError::AlreadyExists { path }
            | BranchError::BadRequest { path, .. }
            | BranchError::InvalidArgument { path, .. }
            | BranchError::Interrupted { path, .. }
            | BranchError::Conflict { path, .. } => path,
            BranchError::InvalidName { name, .. } => name,
        }
    }
}

impl From<BranchError> for crate::Error {
    fn from(err: BranchError) -> Self {
        crate::Error::Branch(err)
    }
}
