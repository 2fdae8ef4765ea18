//! List changes and list reconciliation.
//!
//! A [`ListFeatureDelta`] is an ordered sequence of [`ListChange`]s. Every
//! index refers to the list as it is after all earlier changes of the same
//! sequence were applied, so replaying the sequence front to back against the
//! origin list reproduces the target list.

use std::collections::HashMap;

use tracing::trace;

use super::DeltaError;
use crate::revision::{ListElement, ObjectId, Value};

/// One change to a many-valued feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange {
    /// Insert `value` at `index`.
    Add { index: usize, value: Value },
    /// Remove the element at `index`, which held `value`.
    Remove { index: usize, value: Value },
    /// Move the element at `from` so that it ends up at `to`.
    Move { from: usize, to: usize },
    /// Replace the element at `index`.
    Set { index: usize, value: Value, old: Value },
    /// Remove every element.
    Clear,
}

/// The changes recorded for one list feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFeatureDelta {
    feature: String,
    changes: Vec<ListChange>,
}

impl ListFeatureDelta {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            changes: Vec::new(),
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn changes(&self) -> &[ListChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Record a change after all changes recorded so far.
    ///
    /// A `Clear` supersedes everything before it. A `Remove` of an element
    /// that an earlier `Add` of this delta inserted cancels both changes and
    /// shifts the indices recorded in between.
    pub fn push(&mut self, change: ListChange) {
        match change {
            ListChange::Clear => {
                trace!(feature = %self.feature, dropped = self.changes.len(), "Clear supersedes earlier changes");
                self.changes.clear();
                self.changes.push(ListChange::Clear);
            }
            ListChange::Remove { index, value } => {
                if !self.cancel_add(index) {
                    self.changes.push(ListChange::Remove { index, value });
                }
            }
            other => self.changes.push(other),
        }
    }

    /// Try to cancel a removal at `index` against the `Add` that inserted the
    /// element. Returns whether it was cancelled.
    fn cancel_add(&mut self, index: usize) -> bool {
        // Position of the element before each change, walking backwards.
        let mut before = vec![0usize; self.changes.len()];
        let mut pos = index;
        let mut matched = None;
        for (j, change) in self.changes.iter().enumerate().rev() {
            match change {
                ListChange::Add { index: a, .. } => {
                    if *a == pos {
                        matched = Some(j);
                        break;
                    }
                    if *a < pos {
                        pos -= 1;
                    }
                }
                ListChange::Remove { index: r, .. } => {
                    if pos >= *r {
                        pos += 1;
                    }
                }
                ListChange::Move { from, to } => {
                    if pos == *to {
                        return false;
                    }
                    let p1 = if pos > *to { pos - 1 } else { pos };
                    pos = if p1 >= *from { p1 + 1 } else { p1 };
                }
                ListChange::Set { index: s, .. } => {
                    if *s == pos {
                        return false;
                    }
                }
                ListChange::Clear => return false,
            }
            before[j] = pos;
        }
        let Some(m) = matched else {
            return false;
        };

        for j in m + 1..self.changes.len() {
            let p = before[j];
            match &mut self.changes[j] {
                ListChange::Add { index, .. }
                | ListChange::Remove { index, .. }
                | ListChange::Set { index, .. } => {
                    if *index > p {
                        *index -= 1;
                    }
                }
                ListChange::Move { from, to } => {
                    let p1 = if p > *from { p - 1 } else { p };
                    if *from > p {
                        *from -= 1;
                    }
                    if *to > p1 {
                        *to -= 1;
                    }
                }
                ListChange::Clear => {}
            }
        }
        self.changes.remove(m);
        trace!(feature = %self.feature, index, "Removal cancelled an earlier addition");
        true
    }

    /// Replay the changes onto `list`.
    pub fn apply_to(&self, list: &mut Vec<ListElement>) -> Result<(), DeltaError> {
        for change in &self.changes {
            let len = list.len();
            let out_of_bounds = |index: usize| DeltaError::IndexOutOfBounds {
                feature: self.feature.clone(),
                index,
                len,
            };
            match change {
                ListChange::Add { index, value } => {
                    if *index > len {
                        return Err(out_of_bounds(*index));
                    }
                    list.insert(*index, ListElement::Value(value.clone()));
                }
                ListChange::Remove { index, .. } => {
                    if *index >= len {
                        return Err(out_of_bounds(*index));
                    }
                    list.remove(*index);
                }
                ListChange::Move { from, to } => {
                    if *from >= len || *to >= len {
                        return Err(out_of_bounds(*from.max(to)));
                    }
                    let element = list.remove(*from);
                    list.insert(*to, element);
                }
                ListChange::Set { index, value, .. } => {
                    if *index >= len {
                        return Err(out_of_bounds(*index));
                    }
                    list[*index] = ListElement::Value(value.clone());
                }
                ListChange::Clear => list.clear(),
            }
        }
        Ok(())
    }

    /// Values added or set by this delta, mutably.
    pub(super) fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.changes.iter_mut().flat_map(|change| {
            let values: Vec<&mut Value> = match change {
                ListChange::Add { value, .. } | ListChange::Remove { value, .. } => vec![value],
                ListChange::Set { value, old, .. } => vec![value, old],
                ListChange::Move { .. } | ListChange::Clear => Vec::new(),
            };
            values
        })
    }
}

/// The loaded values of a list, or the feature holding proxies.
pub(super) fn loaded<'a>(id: &ObjectId, feature: &str, list: &'a [ListElement]) -> Result<Vec<&'a Value>, DeltaError> {
    list.iter()
        .map(|e| {
            e.value().ok_or_else(|| DeltaError::PartialCollectionLoading {
                id: id.clone(),
                feature: feature.to_string(),
            })
        })
        .collect()
}

/// Changes turning `old` into `new`, detecting moves.
pub(super) fn diff_ordered(old: &[&Value], new: &[&Value]) -> Vec<ListChange> {
    if !old.is_empty() && new.is_empty() {
        return vec![ListChange::Clear];
    }
    let mut working: Vec<Value> = old.iter().map(|v| (*v).clone()).collect();
    let mut changes = Vec::new();
    let index_of = |list: &[&Value], value: &Value, from: usize| {
        list.iter().skip(from).position(|v| *v == value).map(|p| p + from)
    };

    let mut index = 0;
    for new_value in new {
        let new_value = *new_value;
        if working.len() <= index {
            changes.push(ListChange::Add {
                index,
                value: new_value.clone(),
            });
            working.insert(index, new_value.clone());
        } else {
            loop {
                let target = working[index].clone();
                if target == *new_value {
                    break;
                }
                let position = working.iter().skip(index).position(|v| v == new_value).map(|p| p + index);
                let Some(position) = position else {
                    changes.push(ListChange::Add {
                        index,
                        value: new_value.clone(),
                    });
                    working.insert(index, new_value.clone());
                    break;
                };
                match index_of(new, &target, index) {
                    None => {
                        changes.push(ListChange::Remove {
                            index,
                            value: target,
                        });
                        working.remove(index);
                    }
                    Some(target_index) if target_index > position => {
                        let to = target_index.min(working.len() - 1);
                        changes.push(ListChange::Move { from: index, to });
                        let element = working.remove(index);
                        working.insert(to, element);
                    }
                    Some(_) => {
                        changes.push(ListChange::Move {
                            from: position,
                            to: index,
                        });
                        let element = working.remove(position);
                        working.insert(index, element);
                        break;
                    }
                }
            }
        }
        index += 1;
    }
    while working.len() > index {
        let last = working.len() - 1;
        let value = working.remove(last);
        changes.push(ListChange::Remove { index: last, value });
    }
    changes
}

/// Changes turning `old` into a list holding the same multiset as `new`.
///
/// Surviving elements keep their relative order; additions are appended.
pub(super) fn diff_unordered(old: &[&Value], new: &[&Value]) -> Vec<ListChange> {
    if !old.is_empty() && new.is_empty() {
        return vec![ListChange::Clear];
    }
    let mut wanted: HashMap<&Value, usize> = HashMap::new();
    for v in new {
        *wanted.entry(*v).or_default() += 1;
    }
    let mut keep = vec![false; old.len()];
    for (i, v) in old.iter().enumerate() {
        if let Some(count) = wanted.get_mut(*v) {
            if *count > 0 {
                *count -= 1;
                keep[i] = true;
            }
        }
    }

    let mut changes = Vec::new();
    for i in (0..old.len()).rev().filter(|i| !keep[*i]) {
        changes.push(ListChange::Remove {
            index: i,
            value: old[i].clone(),
        });
    }
    let mut len = keep.iter().filter(|k| **k).count();
    for v in new {
        if let Some(count) = wanted.get_mut(*v) {
            if *count > 0 {
                *count -= 1;
                changes.push(ListChange::Add {
                    index: len,
                    value: (*v).clone(),
                });
                len += 1;
            }
        }
    }
    changes
}
