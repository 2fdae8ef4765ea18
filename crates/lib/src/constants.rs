//! Constants used throughout the strata library.
//!
//! Central definitions for reserved branch paths, sentinels and limits shared
//! by the branch tree and the revision layer.

use crate::Timestamp;

/// Path (and name) of the root branch.
pub const MAIN_PATH: &str = "MAIN";

/// Separator between the segments of a branch path.
pub const SEPARATOR: char = '/';

/// Marker carried by the names of the ephemeral staging branches created
/// during a rebase. Ordinary branch names may not contain it.
pub const STAGING_MARKER: &str = "$rebase";

/// Maximum length of a single branch name.
pub const MAX_BRANCH_NAME_LENGTH: usize = 50;

/// Store-level identifier of the root branch.
pub const MAIN_BRANCH_ID: i32 = 0;

/// Segment owned by the root branch at initialization.
pub const MAIN_SEGMENT: i32 = 0;

/// Timestamp sentinel: "no date". As a query timestamp it means "head", as a
/// `revised` value it means the revision is still current.
pub const UNSPECIFIED_DATE: Timestamp = 0;

/// The first version any object can have on a branch.
pub const FIRST_VERSION: i32 = 1;

/// Chunk size meaning "load lists completely".
pub const UNCHUNKED: i32 = -1;

/// Prefetch depth meaning "do not prefetch".
pub const DEPTH_NONE: i32 = 0;

/// Reserved feature key under which container changes are recorded in a
/// revision delta.
pub const CONTAINER_FEATURE: &str = "$container";
