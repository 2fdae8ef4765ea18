use std::sync::Arc;
use std::thread;

use strata::{
    Error, Result,
    branch::{BranchError, Metadata, RebasePhase},
    constants::STAGING_MARKER,
    repository::{Change, RebaseOptions, Resolution},
    revision::{BranchRef, ObjectId, ObjectType, Revision, Value},
};

use crate::helpers::{concept, concept_with_terms, test_repository, test_repository_with_clock};

fn interrupt(path: &str, phase: RebasePhase) -> Error {
    BranchError::Interrupted {
        path: path.to_string(),
        phase: phase.to_string(),
    }
    .into()
}

#[test]
fn test_child_commits_stay_on_child() {
    let repo = test_repository();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "add", vec![Change::Put(concept("1", true))]).unwrap();

    let id = ObjectId::from("1");
    assert!(repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().is_some());
    assert!(repo.get_revision(&id, &repo.head("MAIN").unwrap()).unwrap().is_none());
}

#[test]
fn test_child_sees_parent_state_at_fork() {
    let repo = test_repository();
    let id = ObjectId::from("1");
    repo.commit("MAIN", "v1", vec![Change::Put(concept("1", true))]).unwrap();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN", "v2", vec![Change::Put(concept("1", false))]).unwrap();

    let on_child = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().unwrap();
    assert_eq!(on_child.get("active"), Some(&Value::Bool(true)));
    let on_main = repo.get_revision(&id, &repo.head("MAIN").unwrap()).unwrap().unwrap();
    assert_eq!(on_main.get("active"), Some(&Value::Bool(false)));
    assert_eq!(on_main.version(), 2);
}

#[test]
fn test_branch_versions_restart_on_child() {
    let repo = test_repository();
    repo.commit("MAIN", "v1", vec![Change::Put(concept("1", true))]).unwrap();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "v1 on a", vec![Change::Put(concept("1", false))]).unwrap();
    repo.commit("MAIN/a", "v2 on a", vec![Change::Put(concept("1", true))]).unwrap();

    let id = ObjectId::from("1");
    let head = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().unwrap();
    assert_eq!(head.version(), 2);
    assert_eq!(head.branch().path(), "MAIN/a");

    let history = repo.history(&id, "MAIN/a").unwrap();
    let versions: Vec<(String, i32)> = history
        .iter()
        .map(|r| (r.branch().path().to_string(), r.version()))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("MAIN/a".to_string(), 2),
            ("MAIN/a".to_string(), 1),
            ("MAIN".to_string(), 1)
        ]
    );
}

#[test]
fn test_commits_under_frozen_clock_stay_ordered() {
    let (repo, clock) = test_repository_with_clock();
    let _hold = clock.hold();
    let first = repo.commit("MAIN", "v1", vec![Change::Put(concept("1", true))]).unwrap();
    let second = repo.commit("MAIN", "v2", vec![Change::Put(concept("1", false))]).unwrap();

    assert!(second.timestamp > first.timestamp);
    assert_eq!(repo.branches().get_branch("MAIN").unwrap().head_timestamp(), second.timestamp);
    let old = repo
        .get_revision(&ObjectId::from("1"), &repo.point("MAIN", first.timestamp).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(old.version(), 1);
}

#[test]
fn test_commit_errors() {
    let repo = test_repository();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.delete_branch("MAIN/a").unwrap();
    let err = repo
        .commit("MAIN/a", "late", vec![Change::Put(concept("1", true))])
        .unwrap_err();
    assert!(err.is_bad_request());

    let err = repo.detach("MAIN", &ObjectId::from("missing")).unwrap_err();
    assert!(err.is_not_found());

    repo.commit("MAIN", "concept", vec![Change::Put(concept("1", true))]).unwrap();
    let other = Arc::new(ObjectType::new("Description", vec![]));
    let err = repo
        .commit(
            "MAIN",
            "retype",
            vec![Change::Put(Revision::new(other, "1", BranchRef::main(), 0, 0))],
        )
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(repo.commit("MAIN/missing", "x", Vec::new()).unwrap_err().is_not_found());
}

#[test]
fn test_detach_on_child_keeps_parent() {
    let repo = test_repository();
    let id = ObjectId::from("1");
    repo.commit("MAIN", "v1", vec![Change::Put(concept("1", true))]).unwrap();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.detach("MAIN/a", &id).unwrap();

    assert!(repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().is_none());
    assert!(repo.get_revision(&id, &repo.head("MAIN").unwrap()).unwrap().is_some());
}

#[test]
fn test_diff_over_history() {
    let repo = test_repository();
    let id = ObjectId::from("1");
    let first = repo
        .commit("MAIN", "v1", vec![Change::Put(concept_with_terms("1", &["a", "b", "c"]))])
        .unwrap();
    let second = repo
        .commit("MAIN", "v2", vec![Change::Put(concept_with_terms("1", &["a", "x", "c"]))])
        .unwrap();

    let delta = repo.diff(&id, "MAIN", first.timestamp, second.timestamp).unwrap().unwrap();
    let origin = repo.get_revision(&id, &repo.point("MAIN", first.timestamp).unwrap()).unwrap().unwrap();
    let target = repo.get_revision(&id, &repo.point("MAIN", second.timestamp).unwrap()).unwrap().unwrap();
    assert_eq!(delta.apply_to(&origin).unwrap(), *target);
}

#[test]
fn test_revisions_survive_rebase_for_earlier_forks() {
    let repo = test_repository();
    let id = ObjectId::from("1");
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "on a", vec![Change::Put(concept("1", true))]).unwrap();
    repo.create_branch("MAIN/a", "b", Metadata::new()).unwrap();
    repo.commit("MAIN", "on main", vec![Change::Put(concept("2", true))]).unwrap();

    repo.rebase("MAIN/a", "MAIN", RebaseOptions::new("sync")).unwrap();

    let on_b = repo.get_revision(&id, &repo.head("MAIN/a/b").unwrap()).unwrap();
    assert!(on_b.is_some());
    let on_a = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap();
    assert!(on_a.is_some());
    assert!(repo.get_revision(&"2".into(), &repo.head("MAIN/a").unwrap()).unwrap().is_some());
    assert!(repo.get_revision(&"2".into(), &repo.head("MAIN/a/b").unwrap()).unwrap().is_none());
}

#[test]
fn test_rebase_errors() {
    let repo = test_repository();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.create_branch("MAIN", "b", Metadata::new()).unwrap();
    assert!(
        repo.rebase("MAIN", "MAIN", RebaseOptions::default())
            .unwrap_err()
            .is_bad_request()
    );
    assert!(
        repo.rebase("MAIN/a", "MAIN/b", RebaseOptions::default())
            .unwrap_err()
            .is_bad_request()
    );
    repo.delete_branch("MAIN/b").unwrap();
    assert!(
        repo.rebase("MAIN/b", "MAIN", RebaseOptions::default())
            .unwrap_err()
            .is_bad_request()
    );
}

fn assert_untouched_after_failed_rebase(options: RebaseOptions, check: impl Fn(&Error)) {
    let repo = test_repository();
    let id = ObjectId::from("1");
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "content", vec![Change::Put(concept("1", true))]).unwrap();
    repo.commit("MAIN", "theirs", vec![Change::Put(concept("1", false))]).unwrap();

    let before = repo.branches().get_branch("MAIN/a").unwrap();
    let content = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().unwrap();
    let stored = repo.revision_store().len();

    let err = repo.rebase("MAIN/a", "MAIN", options).unwrap_err();
    check(&err);

    assert_eq!(repo.branches().get_branch("MAIN/a").unwrap(), before);
    let after = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().unwrap();
    assert_eq!(*after, *content);
    assert_eq!(repo.revision_store().len(), stored);
    assert!(
        repo.branches()
            .all_branches()
            .iter()
            .all(|b| !b.name().contains(STAGING_MARKER))
    );

    // The branch is still usable afterwards.
    repo.rebase("MAIN/a", "MAIN", RebaseOptions::new("retry")).unwrap();
}

#[test]
fn test_interrupted_rebase_leaves_no_residue() {
    for phase in [RebasePhase::Stage, RebasePhase::Replay, RebasePhase::Commit] {
        let options = RebaseOptions::new("interrupted").with_interrupt(move |at| {
            if at == phase {
                Err(interrupt("MAIN/a", at))
            } else {
                Ok(())
            }
        });
        assert_untouched_after_failed_rebase(options, |err| assert!(err.is_interrupted()));
    }
}

#[test]
fn test_failed_merge_leaves_no_residue() {
    let options = RebaseOptions::new("conflicting").with_conflict_processor(|ours: &Revision, _: &Revision| -> Result<Resolution> {
        Err(BranchError::Conflict {
            path: "MAIN/a".to_string(),
            reason: format!("object {} changed on both sides", ours.id()),
        }
        .into())
    });
    assert_untouched_after_failed_rebase(options, |err| assert!(err.is_conflict()));
}

#[test]
fn test_metadata_update_during_rebase_is_kept() {
    let repo = test_repository();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "content", vec![Change::Put(concept("1", true))]).unwrap();

    let branches = repo.branches().clone();
    let options = RebaseOptions::new("sync").with_interrupt(move |phase| {
        if phase == RebasePhase::Commit {
            let mut metadata = Metadata::new();
            metadata.insert("test".to_string(), serde_json::json!(1));
            branches.update_metadata("MAIN/a", metadata)?;
        }
        Ok(())
    });
    repo.rebase("MAIN/a", "MAIN", options).unwrap();

    let branch = repo.branches().get_branch("MAIN/a").unwrap();
    assert_eq!(branch.metadata().get("test"), Some(&serde_json::json!(1)));
    assert!(repo.get_revision(&ObjectId::from("1"), &repo.head("MAIN/a").unwrap()).unwrap().is_some());
}

#[test]
fn test_rebase_resolution_keeps_ours_by_default() {
    let repo = test_repository();
    let id = ObjectId::from("1");
    repo.commit("MAIN", "base", vec![Change::Put(concept("1", true))]).unwrap();
    repo.create_branch("MAIN", "a", Metadata::new()).unwrap();
    repo.commit("MAIN/a", "ours", vec![Change::Put(concept("1", false))]).unwrap();
    repo.commit("MAIN", "theirs", vec![Change::Put(concept("1", true).with_value("module", 7i64))])
        .unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(0));
    let counter = seen.clone();
    let options = RebaseOptions::new("sync").with_conflict_processor(move |_: &Revision, _: &Revision| -> Result<Resolution> {
        *counter.lock() += 1;
        Ok(Resolution::Ours)
    });
    let rebased = repo.rebase("MAIN/a", "MAIN", options).unwrap();
    assert_eq!(*seen.lock(), 1);

    let head = repo.get_revision(&id, &repo.head("MAIN/a").unwrap()).unwrap().unwrap();
    assert_eq!(head.get("active"), Some(&Value::Bool(false)));
    assert_eq!(head.get("module"), None);
    assert_eq!(head.branch().path(), "MAIN/a");
    assert!(rebased.head_timestamp() >= rebased.base_timestamp());
    assert_eq!(repo.commits().last().map(|c| c.message.as_str()), Some("sync"));
}

#[test]
fn test_concurrent_commits_on_sibling_branches() {
    let repo = test_repository();
    for name in ["a", "b", "c", "d"] {
        repo.create_branch("MAIN", name, Metadata::new()).unwrap();
    }

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| {
            let repo = repo.clone();
            thread::spawn(move || {
                let path = format!("MAIN/{name}");
                for i in 0..10 {
                    let id = format!("{name}-{i}");
                    repo.commit(&path, "work", vec![Change::Put(concept(&id, true))])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for name in ["a", "b", "c", "d"] {
        let head = repo.head(&format!("MAIN/{name}")).unwrap();
        for i in 0..10 {
            let id = ObjectId::new(format!("{name}-{i}"));
            assert!(repo.get_revision(&id, &head).unwrap().is_some());
        }
        let other = if name == "a" { "b" } else { "a" };
        assert!(repo.get_revision(&ObjectId::new(format!("{other}-0")), &head).unwrap().is_none());
    }
    assert_eq!(repo.commits().len(), 40);
}
