use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;
use strata::{
    FixedClock, Result, Timestamp,
    branch::{Branch, BranchManager, BranchState, Metadata, RebaseCallbacks, RebasePhase},
    constants::MAIN_PATH,
    store::InMemoryBranchStore,
};

use crate::helpers::{MAIN_BASE, test_manager};

fn metadata(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_main_branch_invariants() {
    let manager = test_manager();
    let main = manager.main_branch().unwrap();
    assert_eq!(main.path(), MAIN_PATH);
    assert_eq!(main.parent_path(), "");
    assert_eq!(main.base_timestamp(), MAIN_BASE);
    assert_eq!(main.head_timestamp(), MAIN_BASE);
    assert_eq!(manager.parent(&main).unwrap().path(), MAIN_PATH);

    manager.handle_commit(MAIN_PATH, MAIN_BASE + 10).unwrap();
    assert_eq!(manager.branch_state(MAIN_PATH).unwrap(), BranchState::UpToDate);
    assert!(manager.delete(MAIN_PATH).unwrap_err().is_bad_request());
}

#[test]
fn test_negative_main_base_is_rejected() {
    let err = Branch::main(-1).unwrap_err();
    assert!(err.is_bad_request() || err.is_invalid_argument());
}

#[test]
fn test_child_segments_are_disjoint() {
    let manager = test_manager();
    let before = manager.main_branch().unwrap();
    let before_info = before.segment_info().unwrap().clone();

    let child = manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    let info = child.segment_info().unwrap();
    assert!(info.segments.is_disjoint(&info.parent_segments));
    assert_eq!(info.parent_segments, before_info.visible());

    let parent = manager.main_branch().unwrap();
    let parent_info = parent.segment_info().unwrap();
    assert!(!before_info.visible().contains(&parent_info.segment_id));
    assert!(!info.is_visible(parent_info.segment_id));

    let grandchild = manager.create_child("MAIN/a", "b", Metadata::new()).unwrap();
    let g = grandchild.segment_info().unwrap();
    assert!(g.segments.is_disjoint(&g.parent_segments));
    assert!(g.parent_segments.is_superset(&info.parent_segments));
}

#[test]
fn test_create_child_errors() {
    let manager = test_manager();
    manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    assert!(
        manager
            .create_child(MAIN_PATH, "a", Metadata::new())
            .unwrap_err()
            .is_already_exists()
    );
    assert!(
        manager
            .create_child("MAIN/missing", "x", Metadata::new())
            .unwrap_err()
            .is_not_found()
    );

    manager.delete("MAIN/a").unwrap();
    assert!(
        manager
            .create_child("MAIN/a", "x", Metadata::new())
            .unwrap_err()
            .is_bad_request()
    );
}

#[test]
fn test_deleted_branch_reopens_fresh() {
    let manager = test_manager();
    let first = manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    manager.delete("MAIN/a").unwrap();
    assert!(manager.store_branch("MAIN/a").unwrap_err().is_invalid_argument());

    let second = manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    assert!(!second.is_deleted());
    assert_ne!(second.segment_id(), first.segment_id());
    assert!(second.base_timestamp() > first.base_timestamp());
}

#[test]
fn test_children_lists_live_descendants() {
    let manager = test_manager();
    manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    manager.create_child("MAIN/a", "b", Metadata::new()).unwrap();
    manager.create_child(MAIN_PATH, "c", Metadata::new()).unwrap();
    manager.delete("MAIN/c").unwrap();

    let paths: Vec<String> = manager
        .children(MAIN_PATH)
        .unwrap()
        .iter()
        .map(|b| b.path().to_string())
        .collect();
    assert_eq!(paths, vec!["MAIN/a", "MAIN/a/b"]);
}

#[test]
fn test_branch_states() {
    let manager = test_manager();
    let child = manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    assert_eq!(manager.branch_state("MAIN/a").unwrap(), BranchState::UpToDate);

    manager.handle_commit("MAIN/a", child.base_timestamp() + 5).unwrap();
    assert_eq!(manager.branch_state("MAIN/a").unwrap(), BranchState::Forward);

    manager.handle_commit(MAIN_PATH, child.base_timestamp() + 7).unwrap();
    assert_eq!(manager.branch_state("MAIN/a").unwrap(), BranchState::Diverged);
}

#[test]
fn test_concurrent_metadata_and_timestamp_updates() {
    let manager = test_manager();
    let child = manager
        .create_child(MAIN_PATH, "a", metadata(json!({"test": 0})))
        .unwrap();
    let head = child.head_timestamp() + 100;

    let timestamp_manager = manager.clone();
    let metadata_manager = manager.clone();
    let a = thread::spawn(move || timestamp_manager.handle_commit("MAIN/a", head));
    let b = thread::spawn(move || metadata_manager.update_metadata("MAIN/a", metadata(json!({"test": 1}))));
    a.join().unwrap().unwrap();
    b.join().unwrap().unwrap();

    let branch = manager.get_branch("MAIN/a").unwrap();
    assert_eq!(branch.head_timestamp(), head);
    assert_eq!(branch.metadata(), &metadata(json!({"test": 1})));
}

/// Parks the rebase at the replay checkpoint until the writer threads are done.
struct ParkedRebase {
    barrier: Arc<Barrier>,
}

impl RebaseCallbacks for ParkedRebase {
    fn checkpoint(&mut self, phase: RebasePhase) -> Result<()> {
        if phase == RebasePhase::Replay {
            self.barrier.wait();
            self.barrier.wait();
        }
        Ok(())
    }

    fn stage(&mut self, _source: &Branch, _staging: &Branch) -> Result<()> {
        Ok(())
    }

    fn replay(&mut self, _staging: &Branch, _rebased: &Branch) -> Result<Option<Timestamp>> {
        Ok(None)
    }
}

#[test]
fn test_updates_interleaved_with_rebase_survive() {
    let store = Arc::new(InMemoryBranchStore::new());
    let manager =
        BranchManager::open_with_clock(store.clone(), Arc::new(FixedClock::new(10_000)), MAIN_BASE)
            .unwrap();
    manager
        .create_child(MAIN_PATH, "a", metadata(json!({"test": 0})))
        .unwrap();
    let before = manager.get_branch("MAIN/a").unwrap();
    let head = before.head_timestamp() + 1_000_000;
    let barrier = Arc::new(Barrier::new(3));

    let rebase_manager = manager.clone();
    let rebase_barrier = barrier.clone();
    let rebase = thread::spawn(move || {
        let mut callbacks = ParkedRebase { barrier: rebase_barrier };
        rebase_manager.rebase("MAIN/a", MAIN_PATH, &mut callbacks)
    });

    let timestamp_manager = manager.clone();
    let timestamp_barrier = barrier.clone();
    let commit = thread::spawn(move || {
        timestamp_barrier.wait();
        let result = timestamp_manager.handle_commit("MAIN/a", head);
        timestamp_barrier.wait();
        result
    });

    let metadata_manager = manager.clone();
    let metadata_barrier = barrier.clone();
    let update = thread::spawn(move || {
        metadata_barrier.wait();
        let result = metadata_manager.update_metadata("MAIN/a", metadata(json!({"test": 1})));
        metadata_barrier.wait();
        result
    });

    commit.join().unwrap().unwrap();
    update.join().unwrap().unwrap();
    let rebased = rebase.join().unwrap().unwrap();

    assert_ne!(rebased.segment_id(), before.segment_id());
    assert_eq!(rebased.head_timestamp(), head);
    assert_eq!(rebased.metadata(), &metadata(json!({"test": 1})));
    assert_eq!(manager.get_branch("MAIN/a").unwrap(), rebased);

    // The store agrees with the index.
    let reopened = BranchManager::open(store).unwrap();
    assert_eq!(reopened.get_branch("MAIN/a").unwrap(), rebased);
}

#[test]
fn test_head_timestamp_never_moves_back() {
    let manager = test_manager();
    manager.handle_commit(MAIN_PATH, 5_000).unwrap();
    manager.handle_commit(MAIN_PATH, 4_000).unwrap();
    assert_eq!(manager.main_branch().unwrap().head_timestamp(), 5_000);
}

#[test]
fn test_reopen_rebuilds_tree_from_store() {
    let store = Arc::new(InMemoryBranchStore::new());
    let first = BranchManager::open(store.clone()).unwrap();
    let a = first.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();

    let second = BranchManager::open(store).unwrap();
    assert_eq!(second.get_branch("MAIN/a").unwrap(), a);
    let b = second.create_child(MAIN_PATH, "b", Metadata::new()).unwrap();
    let used = a.segment_info().unwrap().visible();
    assert!(!used.contains(&b.segment_id().unwrap()));
}

#[test]
fn test_change_listeners() {
    let manager = test_manager();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    manager.add_change_listener(Arc::new(move |path: &str| sink.lock().push(path.to_string())));

    manager.create_child(MAIN_PATH, "a", Metadata::new()).unwrap();
    manager.update_metadata("MAIN/a", Metadata::new()).unwrap();
    manager.delete("MAIN/a").unwrap();
    assert_eq!(seen.lock().as_slice(), ["MAIN/a", "MAIN/a", "MAIN/a"]);
}

#[test]
fn test_invalid_names() {
    let manager = test_manager();
    let long = "n".repeat(51);
    for name in ["", "a/b", "x$rebase", long.as_str()] {
        let err = manager.create_child(MAIN_PATH, name, Metadata::new()).unwrap_err();
        assert!(err.is_bad_request(), "{name:?} should be rejected");
    }
}
