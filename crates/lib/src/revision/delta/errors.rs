//! Delta engine error types.

use thiserror::Error;

use crate::revision::ObjectId;

/// Errors raised while computing, composing or applying revision deltas.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DeltaError {
    /// A list still holds proxy elements. Deltas are never approximated
    /// against partially loaded data.
    #[error("Feature {feature} of object {id} is not fully loaded")]
    PartialCollectionLoading {
        /// The object
        id: ObjectId,
        /// The list feature holding proxies
        feature: String,
    },

    /// The two sides of a diff, or a delta and its target, describe
    /// different objects.
    #[error("Delta for object {expected} used with object {actual}")]
    ObjectMismatch {
        /// The object the delta describes
        expected: ObjectId,
        /// The object it was used with
        actual: ObjectId,
    },

    /// A feature delta names a feature the object type does not declare.
    #[error("Unknown feature {feature} on type {type_name}")]
    UnknownFeature {
        /// The type the delta was applied to
        type_name: String,
        /// The unknown feature
        feature: String,
    },

    /// A list change addresses an index outside the list.
    #[error("Index {index} out of bounds for feature {feature} of length {len}")]
    IndexOutOfBounds {
        /// The list feature
        feature: String,
        /// The offending index
        index: usize,
        /// The list length at that point
        len: usize,
    },

    /// A list change targets a single-valued feature.
    #[error("Feature {feature} is not many-valued")]
    NotAList {
        /// The feature
        feature: String,
    },
}

impl DeltaError {
    /// Check if this error is caused by unloaded list elements.
    pub fn is_partial_data(&self) -> bool {
        matches!(self, DeltaError::PartialCollectionLoading { .. })
    }

    /// Check if this error indicates a delta that does not fit its target.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            DeltaError::ObjectMismatch { .. }
                | DeltaError::UnknownFeature { .. }
                | DeltaError::IndexOutOfBounds { .. }
                | DeltaError::NotAList { .. }
        )
    }
}

impl From<DeltaError> for crate::Error {
    fn from(err: DeltaError) -> Self {
        crate::Error::Delta(err)
    }
}
