//! Revision layer error types.

use thiserror::Error;

use super::ObjectId;

/// Errors raised by the revision cache, manager and loaders.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RevisionError {
    /// A version below the first valid version was requested.
    #[error("Invalid version {version} for object {id}")]
    InvalidVersion {
        /// The object that was requested
        id: ObjectId,
        /// The rejected version
        version: i32,
    },

    /// The object has no live revision on the branch.
    #[error("Object {id} not found on branch {branch}")]
    ObjectNotFound {
        /// The object
        id: ObjectId,
        /// Path of the branch that was read
        branch: String,
    },

    /// The backing loader failed. Loader errors are never retried.
    #[error("Revision loader failed: {reason}")]
    Loader {
        /// Description of the failure
        reason: String,
    },

    /// A revision does not have the object type recorded for its id.
    #[error("Object {id} has type {actual}, expected {expected}")]
    ObjectTypeMismatch {
        /// The object
        id: ObjectId,
        /// The type recorded for the object
        expected: String,
        /// The type that was supplied
        actual: String,
    },

    /// A revision was written to a segment owned by a different branch.
    #[error("Object {id} belongs to branch {expected}, not {actual}")]
    BranchMismatch {
        /// The object
        id: ObjectId,
        /// The branch id owning the segment
        expected: i32,
        /// The branch id of the supplied revision
        actual: i32,
    },
}

impl RevisionError {
    /// Check if this error indicates a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RevisionError::ObjectNotFound { .. })
    }

    /// Check if this error is a failure of the backing loader.
    pub fn is_loader_error(&self) -> bool {
        matches!(self, RevisionError::Loader { .. })
    }

    /// Check if this error indicates a malformed request.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            RevisionError::InvalidVersion { .. }
                | RevisionError::ObjectTypeMismatch { .. }
                | RevisionError::BranchMismatch { .. }
        )
    }
}

impl From<RevisionError> for crate::Error {
    fn from(err: RevisionError) -> Self {
        crate::Error::Revision(err)
    }
}
