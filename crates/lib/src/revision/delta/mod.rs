//! Structural differences between revisions.
//!
//! [`diff`] compares two revisions of the same object and records what
//! changed per feature in a [`RevisionDelta`]. [`apply`] replays a delta onto
//! a revision without touching it. Deltas of consecutive changes to one
//! object fold together with [`RevisionDelta::compose`], which keeps list
//! indices consistent while it folds.
//!
//! Deltas refuse to work on lists that still hold proxy elements.

mod errors;
mod list;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

pub use errors::DeltaError;
pub use list::{ListChange, ListFeatureDelta};

use super::{BranchVersion, Container, ObjectId, ObjectType, Revision, Value};
use crate::Timestamp;
use crate::constants::CONTAINER_FEATURE;

/// The kinds of change a delta can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureDeltaType {
    Set,
    Unset,
    Add,
    Remove,
    Move,
    Clear,
    Container,
    /// A sequence of list changes.
    List,
}

/// The change recorded for one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureDelta {
    /// A single-valued feature received `value`.
    Set {
        feature: String,
        value: Value,
        old: Option<Value>,
    },
    /// A feature lost its value.
    Unset { feature: String },
    /// Changes to a many-valued feature.
    List(ListFeatureDelta),
    /// The object moved in the containment tree.
    Container {
        old: Option<Container>,
        new: Option<Container>,
    },
}

impl FeatureDelta {
    /// The feature the change applies to. Container changes use
    /// [`CONTAINER_FEATURE`].
    pub fn feature(&self) -> &str {
        match self {
            FeatureDelta::Set { feature, .. } | FeatureDelta::Unset { feature } => feature,
            FeatureDelta::List(list) => list.feature(),
            FeatureDelta::Container { .. } => CONTAINER_FEATURE,
        }
    }

    pub fn kind(&self) -> FeatureDeltaType {
        match self {
            FeatureDelta::Set { .. } => FeatureDeltaType::Set,
            FeatureDelta::Unset { .. } => FeatureDeltaType::Unset,
            FeatureDelta::List(_) => FeatureDeltaType::List,
            FeatureDelta::Container { .. } => FeatureDeltaType::Container,
        }
    }
}

impl ListChange {
    pub fn kind(&self) -> FeatureDeltaType {
        match self {
            ListChange::Add { .. } => FeatureDeltaType::Add,
            ListChange::Remove { .. } => FeatureDeltaType::Remove,
            ListChange::Move { .. } => FeatureDeltaType::Move,
            ListChange::Set { .. } => FeatureDeltaType::Set,
            ListChange::Clear => FeatureDeltaType::Clear,
        }
    }
}

/// Rewrites object references held by a delta, e.g. when objects are copied
/// to new ids.
pub trait ReferenceAdjuster {
    /// The id that should replace `id` in `feature`.
    fn adjust(&mut self, feature: &str, id: &ObjectId) -> ObjectId;
}

impl<F> ReferenceAdjuster for F
where
    F: FnMut(&str, &ObjectId) -> ObjectId,
{
    fn adjust(&mut self, feature: &str, id: &ObjectId) -> ObjectId {
        self(feature, id)
    }
}

/// Walks the changes of a delta. Every method defaults to doing nothing.
pub trait FeatureDeltaVisitor {
    fn visit_set(&mut self, _feature: &str, _value: &Value, _old: Option<&Value>) {}

    fn visit_unset(&mut self, _feature: &str) {}

    fn visit_list_change(&mut self, _feature: &str, _change: &ListChange) {}

    fn visit_container(&mut self, _old: Option<&Container>, _new: Option<&Container>) {}
}

/// What changed between two revisions of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionDelta {
    id: ObjectId,
    object_type: Arc<ObjectType>,
    origin: BranchVersion,
    target: BranchVersion,
    created: Timestamp,
    detached: bool,
    features: BTreeMap<String, FeatureDelta>,
}

impl RevisionDelta {
    /// An empty delta from `origin` to a revision `target` created at `created`.
    pub fn new(
        id: impl Into<ObjectId>,
        object_type: Arc<ObjectType>,
        origin: BranchVersion,
        target: BranchVersion,
        created: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            object_type,
            origin,
            target,
            created,
            detached: false,
            features: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.object_type
    }

    pub fn origin(&self) -> &BranchVersion {
        &self.origin
    }

    pub fn target(&self) -> &BranchVersion {
        &self.target
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The recorded feature deltas, keyed by feature name.
    pub fn feature_deltas(&self) -> &BTreeMap<String, FeatureDelta> {
        &self.features
    }

    pub fn feature_delta(&self, feature: &str) -> Option<&FeatureDelta> {
        self.features.get(feature)
    }

    /// Fold a feature delta into this one, after everything recorded so far.
    pub fn add_feature_delta(&mut self, delta: FeatureDelta) {
        let key = delta.feature().to_string();
        trace!(id = %self.id, feature = %key, kind = ?delta.kind(), "Folding feature delta");
        let Some(existing) = self.features.remove(&key) else {
            self.features.insert(key, delta);
            return;
        };
        let folded = match (existing, delta) {
            (FeatureDelta::Set { old, .. }, FeatureDelta::Set { feature, value, .. }) => {
                FeatureDelta::Set { feature, value, old }
            }
            (FeatureDelta::List(mut list), FeatureDelta::List(later)) => {
                for change in later.changes() {
                    list.push(change.clone());
                }
                FeatureDelta::List(list)
            }
            (FeatureDelta::Unset { feature }, FeatureDelta::List(later)) => {
                let mut list = ListFeatureDelta::new(feature);
                list.push(ListChange::Clear);
                for change in later.changes() {
                    list.push(change.clone());
                }
                FeatureDelta::List(list)
            }
            (FeatureDelta::Container { old, .. }, FeatureDelta::Container { new, .. }) => {
                FeatureDelta::Container { old, new }
            }
            (_, later) => later,
        };
        self.features.insert(key, folded);
    }

    /// Fold a later delta of the same object into this one.
    pub fn compose(&mut self, later: &RevisionDelta) -> Result<(), DeltaError> {
        if later.id != self.id {
            return Err(DeltaError::ObjectMismatch {
                expected: self.id.clone(),
                actual: later.id.clone(),
            });
        }
        for delta in later.features.values() {
            self.add_feature_delta(delta.clone());
        }
        self.target = later.target.clone();
        self.created = later.created;
        self.detached = later.detached;
        Ok(())
    }

    /// Rewrite every object reference recorded in this delta.
    pub fn adjust_references(&mut self, adjuster: &mut impl ReferenceAdjuster) {
        let mut adjust = |feature: &str, value: &mut Value| {
            if let Value::Reference(id) = value {
                *id = adjuster.adjust(feature, id);
            }
        };
        for delta in self.features.values_mut() {
            match delta {
                FeatureDelta::Set { feature, value, old } => {
                    adjust(feature, value);
                    if let Some(old) = old {
                        adjust(feature, old);
                    }
                }
                FeatureDelta::List(list) => {
                    let feature = list.feature().to_string();
                    for value in list.values_mut() {
                        adjust(&feature, value);
                    }
                }
                FeatureDelta::Container { old, new } => {
                    for container in [old, new].into_iter().flatten() {
                        for id in [&mut container.resource_id, &mut container.container_id]
                            .into_iter()
                            .flatten()
                        {
                            let mut value = Value::Reference(id.clone());
                            adjust(CONTAINER_FEATURE, &mut value);
                            if let Value::Reference(adjusted) = value {
                                *id = adjusted;
                            }
                        }
                    }
                }
                FeatureDelta::Unset { .. } => {}
            }
        }
    }

    /// Walk every recorded change in feature order.
    pub fn accept(&self, visitor: &mut impl FeatureDeltaVisitor) {
        for delta in self.features.values() {
            match delta {
                FeatureDelta::Set { feature, value, old } => visitor.visit_set(feature, value, old.as_ref()),
                FeatureDelta::Unset { feature } => visitor.visit_unset(feature),
                FeatureDelta::List(list) => {
                    for change in list.changes() {
                        visitor.visit_list_change(list.feature(), change);
                    }
                }
                FeatureDelta::Container { old, new } => visitor.visit_container(old.as_ref(), new.as_ref()),
            }
        }
    }

    /// Replay this delta onto a copy of `revision`. See [`apply`].
    pub fn apply_to(&self, revision: &Revision) -> Result<Revision, DeltaError> {
        apply(self, revision)
    }
}

fn ensure_same_object(origin: &Revision, dirty: &Revision) -> Result<(), DeltaError> {
    if origin.id() != dirty.id() || origin.object_type().name() != dirty.object_type().name() {
        return Err(DeltaError::ObjectMismatch {
            expected: origin.id().clone(),
            actual: dirty.id().clone(),
        });
    }
    Ok(())
}

/// Compute the delta turning `origin` into `dirty`.
///
/// Unordered lists are reconciled as multisets; ordered lists detect moves.
/// Transient features are ignored.
pub fn diff(origin: &Revision, dirty: &Revision) -> Result<RevisionDelta, DeltaError> {
    ensure_same_object(origin, dirty)?;
    let mut delta = RevisionDelta::new(
        origin.id().clone(),
        dirty.object_type().clone(),
        origin.branch_version(),
        dirty.branch_version(),
        dirty.created(),
    );
    delta.detached = dirty.is_detached();

    for feature in dirty.object_type().persistent_features() {
        let name = feature.name();
        if feature.is_many() {
            let old = list::loaded(origin.id(), name, origin.list(name))?;
            let new = list::loaded(dirty.id(), name, dirty.list(name))?;
            let changes = if feature.is_ordered() {
                list::diff_ordered(&old, &new)
            } else {
                list::diff_unordered(&old, &new)
            };
            if changes.is_empty() {
                continue;
            }
            let mut list = ListFeatureDelta::new(name);
            for change in changes {
                list.push(change);
            }
            delta.add_feature_delta(FeatureDelta::List(list));
        } else {
            let (old, new) = (origin.get(name), dirty.get(name));
            if old == new {
                continue;
            }
            delta.add_feature_delta(match new {
                Some(value) => FeatureDelta::Set {
                    feature: name.to_string(),
                    value: value.clone(),
                    old: old.cloned(),
                },
                None => FeatureDelta::Unset {
                    feature: name.to_string(),
                },
            });
        }
    }

    if origin.container() != dirty.container() {
        delta.add_feature_delta(FeatureDelta::Container {
            old: origin.container().cloned(),
            new: dirty.container().cloned(),
        });
    }
    Ok(delta)
}

/// Replay `delta` onto a copy of `revision`.
///
/// The copy takes the delta's target branch, version and creation time and
/// is current. `revision` itself is left untouched.
pub fn apply(delta: &RevisionDelta, revision: &Revision) -> Result<Revision, DeltaError> {
    if delta.id() != revision.id() {
        return Err(DeltaError::ObjectMismatch {
            expected: delta.id().clone(),
            actual: revision.id().clone(),
        });
    }
    let object_type = revision.object_type().clone();
    let mut copy = revision.copy_as(
        delta.target().branch().clone(),
        delta.target().version(),
        delta.created(),
    );
    copy.set_detached(delta.is_detached());

    for feature_delta in delta.features.values() {
        if let FeatureDelta::Container { new, .. } = feature_delta {
            copy.set_container(new.clone());
            continue;
        }
        let name = feature_delta.feature();
        let feature = object_type.feature(name).ok_or_else(|| DeltaError::UnknownFeature {
            type_name: object_type.name().to_string(),
            feature: name.to_string(),
        })?;
        match feature_delta {
            FeatureDelta::Set { value, .. } => copy.set(name, Some(value.clone())),
            FeatureDelta::Unset { .. } => copy.unset(name),
            FeatureDelta::List(list) => {
                if !feature.is_many() {
                    return Err(DeltaError::NotAList {
                        feature: name.to_string(),
                    });
                }
                list::loaded(copy.id(), name, copy.list(name))?;
                list.apply_to(copy.list_mut(name))?;
            }
            FeatureDelta::Container { .. } => {}
        }
    }
    Ok(copy)
}
