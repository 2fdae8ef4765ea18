//! In-memory branch store implementation
//!
//! Keeps every branch record as a JSON document in a map guarded by a single
//! lock. The whole collection can be saved to and loaded from a JSON file.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{BranchStore, Document, Params, Script, StoreError, Write};
use crate::Result;
use crate::branch::Branch;

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Serialize, Deserialize)]
struct SerializableStore {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    branches: BTreeMap<String, Document>,
}

/// A simple in-memory branch store.
///
/// `None` means the collection has not been created yet.
#[derive(Debug, Default)]
pub struct InMemoryBranchStore {
    documents: RwLock<Option<BTreeMap<String, Document>>>,
}

impl InMemoryBranchStore {
    /// Create a store without a branch collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose branch collection already exists.
    pub fn with_collection() -> Self {
        Self {
            documents: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Save the branch collection to `path` as JSON.
    ///
    /// # Errors
    /// Returns [`StoreError::CollectionMissing`] if there is nothing to save.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let branches = self
            .documents
            .read()
            .clone()
            .ok_or(StoreError::CollectionMissing)?;
        let serializable = SerializableStore {
            version: PERSISTENCE_VERSION,
            branches,
        };
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|source| StoreError::SerializationFailed { source })?;
        std::fs::write(path.as_ref(), json).map_err(|source| StoreError::FileIo { source })?;
        debug!(path = %path.as_ref().display(), "Saved branch store");
        Ok(())
    }

    /// Load a branch collection previously written by [`save_to_file`](Self::save_to_file).
    ///
    /// A missing file yields an empty store without a collection.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => return Err(StoreError::FileIo { source }.into()),
        };
        let serializable: SerializableStore = serde_json::from_str(&json)
            .map_err(|source| StoreError::DeserializationFailed { source })?;
        debug!(
            path = %path.display(),
            branches = serializable.branches.len(),
            "Loaded branch store"
        );
        Ok(Self {
            documents: RwLock::new(Some(serializable.branches)),
        })
    }

    fn to_document(branch: &Branch) -> Result<Document> {
        match serde_json::to_value(branch)
            .map_err(|source| StoreError::SerializationFailed { source })?
        {
            Value::Object(doc) => Ok(doc),
            _ => Err(StoreError::InvalidParams {
                script: "put".to_string(),
                reason: "branch did not serialize to an object".to_string(),
            }
            .into()),
        }
    }

    fn from_document(doc: &Document) -> Result<Branch> {
        Ok(serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|source| StoreError::DeserializationFailed { source })?)
    }
}

impl BranchStore for InMemoryBranchStore {
    fn create(&self) -> Result<()> {
        let mut documents = self.documents.write();
        if documents.is_some() {
            return Err(StoreError::CollectionExists.into());
        }
        *documents = Some(BTreeMap::new());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        *self.documents.write() = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.documents.read().is_some()
    }

    fn get(&self, path: &str) -> Result<Option<Branch>> {
        let documents = self.documents.read();
        let documents = documents.as_ref().ok_or(StoreError::CollectionMissing)?;
        documents.get(path).map(Self::from_document).transpose()
    }

    fn put(&self, path: &str, branch: &Branch) -> Result<()> {
        let doc = Self::to_document(branch)?;
        let mut documents = self.documents.write();
        let documents = documents.as_mut().ok_or(StoreError::CollectionMissing)?;
        documents.insert(path.to_string(), doc);
        trace!(path, "Stored branch record");
        Ok(())
    }

    fn write_all(&self, writes: &[Write]) -> Result<()> {
        // Serialize whole records before taking the lock.
        let puts = writes
            .iter()
            .filter_map(|w| match w {
                Write::Put(branch) => Some(Self::to_document(branch)),
                Write::Update { .. } => None,
            })
            .collect::<Result<Vec<_>>>()?;
        let mut puts = puts.into_iter();

        let mut documents = self.documents.write();
        let documents = documents.as_mut().ok_or(StoreError::CollectionMissing)?;

        // Stage every write on scratch copies so a failing script leaves no partial batch.
        let mut staged: BTreeMap<String, Document> = BTreeMap::new();
        for write in writes {
            match write {
                Write::Put(branch) => {
                    if let Some(doc) = puts.next() {
                        staged.insert(branch.path().to_string(), doc);
                    }
                }
                Write::Update {
                    path,
                    script,
                    params,
                } => {
                    if !staged.contains_key(path) {
                        if let Some(current) = documents.get(path) {
                            staged.insert(path.clone(), current.clone());
                        }
                    }
                    let doc = staged.get_mut(path).ok_or_else(|| StoreError::DocumentNotFound {
                        path: path.clone(),
                    })?;
                    script.apply(doc, params)?;
                }
            }
        }

        let count = staged.len();
        documents.extend(staged);
        trace!(count, "Wrote branch records");
        Ok(())
    }

    fn update(&self, path: &str, script: Script, params: &Params) -> Result<()> {
        let mut documents = self.documents.write();
        let documents = documents.as_mut().ok_or(StoreError::CollectionMissing)?;
        let doc = documents
            .get_mut(path)
            .ok_or_else(|| StoreError::DocumentNotFound {
                path: path.to_string(),
            })?;

        // Apply to a scratch copy so an invalid script leaves the record untouched.
        let mut updated = doc.clone();
        script.apply(&mut updated, params)?;
        *doc = updated;
        trace!(path, %script, "Updated branch record");
        Ok(())
    }

    fn all(&self) -> Result<Vec<Branch>> {
        let documents = self.documents.read();
        let documents = documents.as_ref().ok_or(StoreError::CollectionMissing)?;
        documents.values().map(Self::from_document).collect()
    }
}
