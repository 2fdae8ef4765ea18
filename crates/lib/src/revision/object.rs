//! Object types and field values.

use super::ObjectId;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Boolean attribute.
    Bool(bool),
    /// Integer attribute.
    Int(i64),
    /// String attribute.
    String(String),
    /// Reference to another object.
    Reference(ObjectId),
}

impl Value {
    /// The referenced object, if this is a reference.
    pub fn as_reference(&self) -> Option<&ObjectId> {
        match self {
            Value::Reference(id) => Some(id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::Reference(v)
    }
}

/// One element of a many-valued field.
///
/// Loaders that load lists in chunks leave the elements past the chunk as
/// proxies. Revisions holding proxies cannot take part in diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListElement {
    /// A loaded element.
    Value(Value),
    /// An element that has not been loaded; `index` is its list position.
    Proxy {
        /// Position of the element in the complete list
        index: usize,
    },
}

impl ListElement {
    /// The loaded value, or `None` for a proxy.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ListElement::Value(v) => Some(v),
            ListElement::Proxy { .. } => None,
        }
    }

    /// Whether this element still needs loading.
    pub fn is_proxy(&self) -> bool {
        matches!(self, ListElement::Proxy { .. })
    }
}

impl From<Value> for ListElement {
    fn from(v: Value) -> Self {
        ListElement::Value(v)
    }
}

/// Whether a feature holds plain data or references other objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Plain data.
    Attribute,
    /// References to other objects.
    Reference,
}

/// A declared field of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feature {
    name: String,
    kind: FeatureKind,
    many: bool,
    ordered: bool,
    transient: bool,
}

impl Feature {
    /// A single-valued, persistent attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Attribute,
            many: false,
            ordered: true,
            transient: false,
        }
    }

    /// A single-valued, persistent reference.
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            kind: FeatureKind::Reference,
            ..Self::attribute(name)
        }
    }

    /// Make the feature many-valued.
    pub fn many(self) -> Self {
        Self { many: true, ..self }
    }

    /// Make the feature unordered; only meaningful for many-valued features.
    pub fn unordered(self) -> Self {
        Self {
            ordered: false,
            ..self
        }
    }

    /// Exclude the feature from persistence and diffing.
    pub fn transient(self) -> Self {
        Self {
            transient: true,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_reference(&self) -> bool {
        self.kind == FeatureKind::Reference
    }
}

/// The type of an object: a name and its declared features.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectType {
    name: String,
    features: Vec<Feature>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared features in declaration order.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Look up a feature by name.
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// The features that are stored and diffed.
    pub fn persistent_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|f| !f.transient)
    }
}

/// Where an object sits in the containment tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    /// The resource holding the object.
    pub resource_id: Option<ObjectId>,
    /// The object directly containing this one.
    pub container_id: Option<ObjectId>,
    /// The containing feature's index on the container's type.
    pub containing_feature: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_builders() {
        let f = Feature::reference("members").many().unordered();
        assert!(f.is_many());
        assert!(!f.is_ordered());
        assert!(f.is_reference());
        assert!(!f.is_transient());
    }

    #[test]
    fn persistent_features_skip_transient() {
        let t = ObjectType::new(
            "Concept",
            vec![
                Feature::attribute("active"),
                Feature::attribute("label").transient(),
            ],
        );
        let names: Vec<_> = t.persistent_features().map(Feature::name).collect();
        assert_eq!(names, vec!["active"]);
        assert!(t.feature("label").is_some());
    }
}
