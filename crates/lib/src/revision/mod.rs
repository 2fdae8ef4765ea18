//! Versioned objects.
//!
//! A [`Revision`] is one immutable version of one object on one branch,
//! valid from its `created` timestamp up to and including its `revised`
//! timestamp. The only mutable part of a revision is `revised`, which is set
//! once when a newer version of the same object is committed on the same
//! branch. Revisions are shared as `Arc<Revision>` between the cache and its
//! readers.
//!
//! The submodules provide the moving parts around revisions:
//!
//! - [`cache`]: audit and non-audit revision caches with eviction
//! - [`RevisionManager`]: the load-and-add and revise protocol on top of a cache
//! - [`delta`]: structural differences between two revisions
//! - [`store`]: an in-memory, segment-keyed revision loader

pub mod cache;
pub mod delta;
mod errors;
mod id;
mod loader;
mod manager;
mod object;
mod point;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub use errors::RevisionError;
pub use id::ObjectId;
pub use loader::{RevisionBranchProvider, RevisionInfo, RevisionLoader};
pub use manager::{RevisionManager, RevisionManagerConfig};
pub use object::{Container, Feature, FeatureKind, ListElement, ObjectType, Value};
pub use point::{BranchPoint, BranchRef, BranchVersion};

use crate::Timestamp;
use crate::constants::UNSPECIFIED_DATE;

/// One version of one object on one branch.
pub struct Revision {
    object_type: Arc<ObjectType>,
    id: ObjectId,
    branch: BranchRef,
    version: i32,
    created: Timestamp,
    revised: AtomicI64,
    detached: bool,
    container: Option<Container>,
    values: BTreeMap<String, Value>,
    lists: BTreeMap<String, Vec<ListElement>>,
}

impl Revision {
    /// An empty, current revision.
    pub fn new(
        object_type: Arc<ObjectType>,
        id: impl Into<ObjectId>,
        branch: BranchRef,
        version: i32,
        created: Timestamp,
    ) -> Self {
        Self {
            object_type,
            id: id.into(),
            branch,
            version,
            created,
            revised: AtomicI64::new(UNSPECIFIED_DATE),
            detached: false,
            container: None,
            values: BTreeMap::new(),
            lists: BTreeMap::new(),
        }
    }

    /// A revision marking the object as deleted on `branch` from `created` on.
    pub fn detached(
        object_type: Arc<ObjectType>,
        id: impl Into<ObjectId>,
        branch: BranchRef,
        version: i32,
        created: Timestamp,
    ) -> Self {
        Self {
            detached: true,
            ..Self::new(object_type, id, branch, version, created)
        }
    }

    /// Builder-style setter for a single-valued feature.
    pub fn with_value(mut self, feature: &str, value: impl Into<Value>) -> Self {
        self.set(feature, Some(value.into()));
        self
    }

    /// Builder-style setter for a many-valued feature.
    pub fn with_list<V: Into<Value>>(mut self, feature: &str, values: impl IntoIterator<Item = V>) -> Self {
        *self.list_mut(feature) = values
            .into_iter()
            .map(|v| ListElement::Value(v.into()))
            .collect();
        self
    }

    /// Builder-style setter for the container slot.
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.object_type
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// The commit timestamp that created this revision.
    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// The last timestamp this revision is valid at, or [`UNSPECIFIED_DATE`]
    /// while it is current.
    pub fn revised(&self) -> Timestamp {
        self.revised.load(Ordering::Acquire)
    }

    /// Close the validity range of this revision.
    pub fn set_revised(&self, revised: Timestamp) {
        self.revised.store(revised, Ordering::Release);
    }

    /// Whether a newer version has closed this revision.
    pub fn is_historical(&self) -> bool {
        self.revised() != UNSPECIFIED_DATE
    }

    /// Whether this revision is the one to read at `timestamp`.
    ///
    /// [`UNSPECIFIED_DATE`] asks for the current revision.
    pub fn is_valid(&self, timestamp: Timestamp) -> bool {
        let revised = self.revised();
        if timestamp == UNSPECIFIED_DATE {
            return revised == UNSPECIFIED_DATE;
        }
        self.created <= timestamp && (revised == UNSPECIFIED_DATE || timestamp <= revised)
    }

    /// Whether this revision marks the object as deleted.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn set_detached(&mut self, detached: bool) {
        self.detached = detached;
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    pub fn set_container(&mut self, container: Option<Container>) {
        self.container = container;
    }

    pub fn branch_version(&self) -> BranchVersion {
        self.branch.version(self.version)
    }

    pub fn branch_point(&self) -> BranchPoint {
        self.branch.point(self.created)
    }

    /// Value of a single-valued feature.
    pub fn get(&self, feature: &str) -> Option<&Value> {
        self.values.get(feature)
    }

    /// Set or clear a single-valued feature.
    pub fn set(&mut self, feature: &str, value: Option<Value>) {
        match value {
            Some(v) => {
                self.values.insert(feature.to_string(), v);
            }
            None => {
                self.values.remove(feature);
            }
        }
    }

    /// Elements of a many-valued feature; empty if never set.
    pub fn list(&self, feature: &str) -> &[ListElement] {
        self.lists.get(feature).map_or(&[], Vec::as_slice)
    }

    /// Mutable elements of a many-valued feature, created empty on demand.
    pub fn list_mut(&mut self, feature: &str) -> &mut Vec<ListElement> {
        self.lists.entry(feature.to_string()).or_default()
    }

    /// Remove a feature's value entirely.
    pub fn unset(&mut self, feature: &str) {
        self.values.remove(feature);
        self.lists.remove(feature);
    }

    /// Whether every list element of every feature is loaded.
    pub fn is_fully_loaded(&self) -> bool {
        self.lists
            .values()
            .all(|list| !list.iter().any(ListElement::is_proxy))
    }

    /// A current copy of this revision's payload as `version` on `branch`.
    pub fn copy_as(&self, branch: BranchRef, version: i32, created: Timestamp) -> Revision {
        Revision {
            branch,
            version,
            created,
            revised: AtomicI64::new(UNSPECIFIED_DATE),
            ..self.clone()
        }
    }

    fn feature_equals(&self, other: &Revision, feature: &Feature) -> bool {
        if !feature.is_many() {
            return self.get(feature.name()) == other.get(feature.name());
        }
        let (left, right) = (self.list(feature.name()), other.list(feature.name()));
        if feature.is_ordered() {
            return left == right;
        }
        if left.len() != right.len() {
            return false;
        }
        let mut counts: HashMap<&ListElement, i64> = HashMap::new();
        for e in left {
            *counts.entry(e).or_default() += 1;
        }
        for e in right {
            *counts.entry(e).or_default() -= 1;
        }
        counts.values().all(|c| *c == 0)
    }
}

impl Clone for Revision {
    fn clone(&self) -> Self {
        Self {
            object_type: self.object_type.clone(),
            id: self.id.clone(),
            branch: self.branch.clone(),
            version: self.version,
            created: self.created,
            revised: AtomicI64::new(self.revised()),
            detached: self.detached,
            container: self.container.clone(),
            values: self.values.clone(),
            lists: self.lists.clone(),
        }
    }
}

/// Two revisions are equal when they describe the same version of the same
/// object with the same payload. Unordered many-valued features compare as
/// multisets, and `revised` is ignored since it changes after creation.
impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.object_type.name() == other.object_type.name()
            && self.branch == other.branch
            && self.version == other.version
            && self.created == other.created
            && self.detached == other.detached
            && self.container == other.container
            && self
                .object_type
                .persistent_features()
                .all(|f| self.feature_equals(other, f))
    }
}

impl std::fmt::Debug for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revision")
            .field("type", &self.object_type.name())
            .field("id", &self.id)
            .field("branch", &self.branch)
            .field("version", &self.version)
            .field("created", &self.created)
            .field("revised", &self.revised())
            .field("detached", &self.detached)
            .field("values", &self.values)
            .field("lists", &self.lists)
            .finish()
    }
}
