//! Branch store error types.

use thiserror::Error;

/// Errors that can occur while talking to a branch document store.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The branch collection has not been created.
    #[error("Branch collection does not exist")]
    CollectionMissing,

    /// The branch collection was created twice.
    #[error("Branch collection already exists")]
    CollectionExists,

    /// No document is stored at the given path.
    #[error("Branch document not found: {path}")]
    DocumentNotFound {
        /// The path that was looked up
        path: String,
    },

    /// An update named a script the store does not know.
    #[error("Unknown update script: {script}")]
    UnknownScript {
        /// The script name
        script: String,
    },

    /// An update script was given parameters it cannot use.
    #[error("Invalid parameters for script {script}: {reason}")]
    InvalidParams {
        /// The script name
        script: String,
        /// What is wrong with the parameters
        reason: String,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Check if this error indicates a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::DocumentNotFound { .. })
    }

    /// Check if this error is related to I/O operations.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            StoreError::FileIo { .. }
                | StoreError::SerializationFailed { .. }
                | StoreError::DeserializationFailed { .. }
        )
    }

    /// Check if this error indicates a malformed update request.
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownScript { .. } | StoreError::InvalidParams { .. }
        )
    }

    /// Check if this error is about the collection lifecycle.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            StoreError::CollectionMissing | StoreError::CollectionExists
        )
    }
}

impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        crate::Error::Store(err)
    }
}
