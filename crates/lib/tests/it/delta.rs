use proptest::prelude::*;
use strata::revision::{
    BranchRef, ObjectId, Revision, Value,
    delta::{self, FeatureDelta, ListChange},
};

use crate::helpers::concept_type;

fn terms(id: &str, version: i32, values: &[&str]) -> Revision {
    Revision::new(concept_type(), id, BranchRef::main(), version, version as i64 * 100)
        .with_list("terms", values.iter().copied())
}

fn term_values(revision: &Revision) -> Vec<Value> {
    revision
        .list("terms")
        .iter()
        .filter_map(|e| e.value().cloned())
        .collect()
}

#[test]
fn test_composed_deltas_match_direct_diff() {
    let abc = terms("1", 1, &["A", "B", "C"]);
    let ac = terms("1", 2, &["A", "C"]);
    let axc = terms("1", 3, &["A", "X", "C"]);

    let mut composed = delta::diff(&abc, &ac).unwrap();
    composed.compose(&delta::diff(&ac, &axc).unwrap()).unwrap();
    let direct = delta::diff(&abc, &axc).unwrap();

    let via_composed = delta::apply(&composed, &abc).unwrap();
    let via_direct = delta::apply(&direct, &abc).unwrap();
    assert_eq!(term_values(&via_composed), term_values(&axc));
    assert_eq!(via_composed, via_direct);
    assert_eq!(via_composed, axc);
}

#[test]
fn test_emptied_list_is_a_single_clear() {
    let full = terms("1", 1, &["A", "B", "C"]);
    let empty = terms("1", 2, &[]);
    let delta = delta::diff(&full, &empty).unwrap();
    match delta.feature_delta("terms") {
        Some(FeatureDelta::List(list)) => assert_eq!(list.changes(), &[ListChange::Clear]),
        other => panic!("expected a list delta, got {other:?}"),
    }
}

#[test]
fn test_apply_leaves_input_untouched() {
    let origin = terms("1", 1, &["A"]);
    let dirty = terms("1", 2, &["B", "A"]).with_value("active", false);
    let delta = delta::diff(&origin, &dirty).unwrap();

    let applied = delta::apply(&delta, &origin).unwrap();
    assert_eq!(applied, dirty);
    assert_eq!(term_values(&origin), vec![Value::from("A")]);
    assert_eq!(origin.get("active"), None);
}

#[test]
fn test_delta_errors_classify() {
    let a = terms("1", 1, &["A"]);
    let b = terms("2", 1, &["A"]);
    let err: strata::Error = delta::diff(&a, &b).unwrap_err().into();
    assert!(err.is_invalid_argument());

    let mut partial = terms("1", 2, &["A"]);
    partial
        .list_mut("terms")
        .push(strata::revision::ListElement::Proxy { index: 1 });
    let err: strata::Error = delta::diff(&a, &partial).unwrap_err().into();
    assert!(err.is_partial_data());
}

#[test]
fn test_reference_adjustment() {
    let t = concept_type();
    let origin = Revision::new(t.clone(), "1", BranchRef::main(), 1, 100);
    let dirty = Revision::new(t, "1", BranchRef::main(), 2, 200).with_list("parents", [ObjectId::from("p")]);
    let mut delta = delta::diff(&origin, &dirty).unwrap();
    delta.adjust_references(&mut |_: &str, id: &ObjectId| ObjectId::new(format!("copy-{id}")));

    let applied = delta::apply(&delta, &origin).unwrap();
    assert_eq!(
        applied.list("parents")[0].value(),
        Some(&Value::Reference(ObjectId::from("copy-p")))
    );
}

fn revision_strategy(version: i32) -> impl Strategy<Value = Revision> {
    (
        proptest::option::of(any::<bool>()),
        proptest::option::of(0i64..3),
        proptest::collection::vec("[a-d]", 0..6),
        proptest::collection::vec("[p-s]", 0..5),
    )
        .prop_map(move |(active, module, terms, parents)| {
            let mut revision = Revision::new(concept_type(), "1", BranchRef::main(), version, version as i64 * 100)
                .with_list("terms", terms)
                .with_list("parents", parents.into_iter().map(ObjectId::from));
            revision.set("active", active.map(Value::from));
            revision.set("module", module.map(Value::from));
            revision
        })
}

proptest! {
    #[test]
    fn prop_apply_diff_reproduces_dirty(origin in revision_strategy(1), dirty in revision_strategy(2)) {
        let delta = delta::diff(&origin, &dirty).unwrap();
        let applied = delta::apply(&delta, &origin).unwrap();
        prop_assert_eq!(applied, dirty);
    }

    #[test]
    fn prop_composition_matches_direct(
        a in revision_strategy(1),
        b in revision_strategy(2),
        c in revision_strategy(3),
    ) {
        let mut composed = delta::diff(&a, &b).unwrap();
        composed.compose(&delta::diff(&b, &c).unwrap()).unwrap();
        let applied = delta::apply(&composed, &a).unwrap();
        prop_assert_eq!(applied, c);
    }
}
