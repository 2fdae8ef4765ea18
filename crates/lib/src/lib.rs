//!
//! Strata: a branch-aware revision store.
//!
//! ## Core Concepts
//!
//! * **Branches (`branch::Branch`)**: A tree of named branches rooted at `MAIN`. Every branch forks
//!   from its parent at a base timestamp and moves its head forward with each commit. Branch history
//!   is kept in numbered segments so that a branch only ever sees its own writes plus the parent
//!   history frozen at fork time.
//! * **Branch manager (`branch::BranchManager`)**: Creates, deletes and rebases branches, and
//!   resolves a branch path to its store-level segment view.
//! * **Revisions (`revision::Revision`)**: One immutable version of one object on one branch, valid
//!   over a `[created, revised]` timestamp range.
//! * **Revision manager (`revision::RevisionManager`)**: Caches revisions in front of a loader. Cache
//!   misses are loaded and added under one lock, so concurrent readers of the same object observe a
//!   single instance per version.
//! * **Deltas (`revision::delta`)**: Structural differences between two revisions of one object,
//!   including minimal edit sequences for ordered and unordered lists.
//! * **Repository (`repository::Repository`)**: Ties the pieces together behind a commit/read API.

pub mod branch;
pub mod clock;
pub mod constants;
pub mod repository;
pub mod revision;
pub mod store;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use repository::{Repository, RepositoryConfig};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Result type used throughout the Strata library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Strata library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured branch errors from the branch module
    #[error(transparent)]
    Branch(branch::BranchError),

    /// Structured branch store errors from the store module
    #[error(transparent)]
    Store(store::StoreError),

    /// Structured revision errors from the revision module
    #[error(transparent)]
    Revision(revision::RevisionError),

    /// Structured delta errors from the revision delta engine
    #[error(transparent)]
    Delta(revision::delta::DeltaError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Branch(_) => "branch",
            Error::Store(_) => "store",
            Error::Revision(_) => "revision",
            Error::Delta(_) => "delta",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_not_found(),
            Error::Store(store_err) => store_err.is_not_found(),
            Error::Revision(revision_err) => revision_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates the resource already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_already_exists(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict (already exists, or a
    /// rejected rebase).
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_conflict() || branch_err.is_already_exists(),
            _ => false,
        }
    }

    /// Check if this error indicates a request the branch tree refused.
    pub fn is_bad_request(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_bad_request(),
            _ => false,
        }
    }

    /// Check if this error indicates an argument that cannot be used.
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_invalid_argument(),
            Error::Revision(revision_err) => revision_err.is_invalid_argument(),
            Error::Delta(delta_err) => delta_err.is_invalid_argument(),
            _ => false,
        }
    }

    /// Check if this error is caused by partially loaded data.
    pub fn is_partial_data(&self) -> bool {
        match self {
            Error::Delta(delta_err) => delta_err.is_partial_data(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Store(store_err) => store_err.is_io_error(),
            Error::Revision(revision_err) => revision_err.is_loader_error(),
            _ => false,
        }
    }

    /// Check if this error indicates an interrupted rebase.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Branch(branch_err) => branch_err.is_interrupted(),
            _ => false,
        }
    }
}
