//! Backing document store for branch records.
//!
//! The branch tree keeps its authoritative state in a [`BranchStore`]. The
//! in-memory branch objects held by the [`BranchManager`](crate::branch::BranchManager)
//! are derived views that can always be rebuilt from the store.
//!
//! Writes that touch a single field of a record go through
//! [`BranchStore::update`] with a named [`Script`]. A script rewrites only the
//! fields it names, so two concurrent updates of different fields of the same
//! record both survive.

mod errors;
pub mod in_memory;

use std::str::FromStr;

use serde_json::Value;

pub use errors::StoreError;
pub use in_memory::InMemoryBranchStore;

use crate::Result;
use crate::branch::Branch;

/// Parameters passed to an update script.
pub type Params = serde_json::Map<String, Value>;

/// A JSON branch document as stored.
pub type Document = serde_json::Map<String, Value>;

/// Named partial updates a store applies to a branch document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// Move `headTimestamp` forward to `params.headTimestamp`. Never moves it back.
    WithHeadTimestamp,
    /// Replace `metadata` with `params.metadata`.
    WithMetadata,
    /// Set `deleted` to true.
    WithDeleted,
    /// Replace `segmentId` and `segments` with the values in `params`.
    WithSegments,
    /// Re-fork a rebased branch: replace its type, base and segment
    /// bookkeeping. The head is set to `params.headTimestamp` unless a commit
    /// moved it past `params.stagedHeadTimestamp` in the meantime, in which
    /// case the later of the two wins. Metadata and the deletion flag are
    /// left alone.
    WithRebase,
}

impl Script {
    /// The stable script name.
    pub fn name(&self) -> &'static str {
        match self {
            Script::WithHeadTimestamp => "withHeadTimestamp",
            Script::WithMetadata => "withMetadata",
            Script::WithDeleted => "withDeleted",
            Script::WithSegments => "withSegments",
            Script::WithRebase => "withRebase",
        }
    }

    /// Apply this script to `doc` in place, touching only the fields it owns.
    pub fn apply(&self, doc: &mut Document, params: &Params) -> Result<()> {
        match self {
            Script::WithHeadTimestamp => {
                let requested = self.param(params, "headTimestamp")?;
                let requested = requested.as_i64().ok_or_else(|| self.invalid(
                    "headTimestamp must be an integer",
                ))?;
                let current = doc
                    .get("headTimestamp")
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::MIN);
                if requested > current {
                    doc.insert("headTimestamp".to_string(), Value::from(requested));
                }
            }
            Script::WithMetadata => {
                let metadata = self.param(params, "metadata")?;
                if !metadata.is_object() {
                    return Err(self.invalid("metadata must be an object").into());
                }
                doc.insert("metadata".to_string(), metadata.clone());
            }
            Script::WithDeleted => {
                doc.insert("deleted".to_string(), Value::Bool(true));
            }
            Script::WithSegments => {
                let segment_id = self.param(params, "segmentId")?;
                let segments = self.param(params, "segments")?;
                if !segment_id.is_i64() || !segments.is_array() {
                    return Err(self
                        .invalid("segmentId must be an integer and segments an array")
                        .into());
                }
                doc.insert("segmentId".to_string(), segment_id.clone());
                doc.insert("segments".to_string(), segments.clone());
            }
            Script::WithRebase => {
                let kind = self.param(params, "type")?;
                let base = self.param(params, "baseTimestamp")?.as_i64();
                let head = self.param(params, "headTimestamp")?.as_i64();
                let staged = self.param(params, "stagedHeadTimestamp")?.as_i64();
                let (Some(base), Some(head), Some(staged)) = (base, head, staged) else {
                    return Err(self.invalid("timestamps must be integers").into());
                };
                let segment_id = self.param(params, "segmentId")?;
                let segments = self.param(params, "segments")?;
                let parent_segments = self.param(params, "parentSegments")?;
                let store_branch_id = self.param(params, "cdoBranchId")?;
                if !kind.is_string()
                    || !segment_id.is_i64()
                    || !segments.is_array()
                    || !parent_segments.is_array()
                    || !store_branch_id.is_i64()
                {
                    return Err(self.invalid("malformed segment bookkeeping").into());
                }

                let current = doc
                    .get("headTimestamp")
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::MIN);
                let head = if current > staged { current.max(head) } else { head };

                doc.insert("type".to_string(), kind.clone());
                doc.insert("baseTimestamp".to_string(), Value::from(base));
                doc.insert("headTimestamp".to_string(), Value::from(head));
                doc.insert("segmentId".to_string(), segment_id.clone());
                doc.insert("segments".to_string(), segments.clone());
                doc.insert("parentSegments".to_string(), parent_segments.clone());
                doc.insert("cdoBranchId".to_string(), store_branch_id.clone());
            }
        }
        Ok(())
    }

    fn param<'a>(&self, params: &'a Params, key: &str) -> Result<&'a Value> {
        params
            .get(key)
            .ok_or_else(|| self.invalid(&format!("missing '{key}'")).into())
    }

    fn invalid(&self, reason: &str) -> StoreError {
        StoreError::InvalidParams {
            script: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for Script {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "withHeadTimestamp" => Ok(Script::WithHeadTimestamp),
            "withMetadata" => Ok(Script::WithMetadata),
            "withDeleted" => Ok(Script::WithDeleted),
            "withSegments" => Ok(Script::WithSegments),
            "withRebase" => Ok(Script::WithRebase),
            other => Err(StoreError::UnknownScript {
                script: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One write of an atomic [`BranchStore::write_all`] batch.
#[derive(Debug, Clone)]
pub enum Write {
    /// Store a whole new record. Only used for records that do not exist
    /// yet or are being replaced after deletion.
    Put(Branch),
    /// Apply a partial update script to an existing record.
    Update {
        path: String,
        script: Script,
        params: Params,
    },
}

/// Document store holding one record per branch path.
///
/// Implementations must provide strict read-after-write consistency for a
/// single writer and must apply [`update`](BranchStore::update) as a
/// per-field partial update rather than a whole-document overwrite.
///
/// All store implementations must be `Send` and `Sync` to allow sharing
/// across request threads.
pub trait BranchStore: Send + Sync + std::fmt::Debug {
    /// Create the branch collection.
    ///
    /// # Errors
    /// Returns [`StoreError::CollectionExists`] if it already exists.
    fn create(&self) -> Result<()>;

    /// Drop the branch collection and every record in it.
    fn delete(&self) -> Result<()>;

    /// Whether the branch collection exists.
    fn exists(&self) -> bool;

    /// Read the record at `path`, if any.
    fn get(&self, path: &str) -> Result<Option<Branch>>;

    /// Write the whole record at `path`.
    fn put(&self, path: &str, branch: &Branch) -> Result<()>;

    /// Apply several writes atomically: either all land or none.
    ///
    /// # Errors
    /// Returns [`StoreError::DocumentNotFound`] if an update targets a
    /// missing record, or the script's error if its params are invalid.
    fn write_all(&self, writes: &[Write]) -> Result<()>;

    /// Apply a partial update script to the record at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::DocumentNotFound`] if no record exists at `path`.
    fn update(&self, path: &str, script: Script, params: &Params) -> Result<()>;

    /// Read every record in the collection.
    fn all(&self) -> Result<Vec<Branch>>;
}
