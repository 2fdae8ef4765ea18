use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;
use strata::{
    Result,
    constants::{DEPTH_NONE, UNCHUNKED, UNSPECIFIED_DATE},
    revision::{
        BranchPoint, BranchRef, BranchVersion, ObjectId, Revision, RevisionInfo, RevisionLoader,
        RevisionManager, RevisionManagerConfig,
        cache::{EvictionEvent, ReferencePolicy, create_cache},
    },
};

use crate::helpers::{concept_type, strong_config};

fn revision(id: &str, branch: &BranchRef, version: i32, created: i64) -> Revision {
    Revision::new(concept_type(), id, branch.clone(), version, created)
}

/// Serves revisions from a shared list and counts batch loads.
#[derive(Default)]
struct CountingLoader {
    revisions: Mutex<Vec<Revision>>,
    loads: AtomicUsize,
}

impl RevisionLoader for CountingLoader {
    fn load_revision_by_version(
        &self,
        id: &ObjectId,
        version: &BranchVersion,
        _chunk_size: i32,
    ) -> Result<Option<Revision>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .revisions
            .lock()
            .iter()
            .find(|r| r.id() == id && r.branch_version() == *version)
            .cloned())
    }

    fn load_revisions(
        &self,
        infos: &[RevisionInfo],
        point: &BranchPoint,
        _chunk_size: i32,
        _prefetch_depth: i32,
    ) -> Result<Vec<Option<Revision>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        // Give concurrent readers a chance to pile up behind the load lock.
        thread::sleep(std::time::Duration::from_millis(5));
        let revisions = self.revisions.lock();
        Ok(infos
            .iter()
            .map(|info| {
                revisions
                    .iter()
                    .filter(|r| r.id() == info.id() && r.branch() == point.branch())
                    .find(|r| r.is_valid(point.timestamp()))
                    .cloned()
            })
            .collect())
    }
}

#[test]
fn test_concurrent_misses_load_once() {
    let main = BranchRef::main();
    let loader = Arc::new(CountingLoader::default());
    loader.revisions.lock().push(revision("1", &main, 1, 100));
    let manager = RevisionManager::new(strong_config(), Some(loader.clone()));

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            let point = main.head();
            thread::spawn(move || {
                barrier.wait();
                manager
                    .get_revision(&ObjectId::from("1"), &point, UNCHUNKED, DEPTH_NONE, true)
                    .unwrap()
                    .unwrap()
            })
        })
        .collect();
    let results: Vec<Arc<Revision>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

#[test]
fn test_batch_loads_only_missing_ids() {
    let main = BranchRef::main();
    let loader = Arc::new(CountingLoader::default());
    {
        let mut revisions = loader.revisions.lock();
        revisions.push(revision("1", &main, 1, 100));
        revisions.push(revision("2", &main, 1, 100));
    }
    let manager = RevisionManager::new(strong_config(), Some(loader.clone()));
    manager.add_revision(Arc::new(revision("1", &main, 1, 100)));

    let ids = [ObjectId::from("1"), ObjectId::from("2"), ObjectId::from("3")];
    let results = manager
        .get_revisions(&ids, &main.head(), UNCHUNKED, DEPTH_NONE, true)
        .unwrap();
    assert!(results[0].is_some());
    assert!(results[1].is_some());
    assert!(results[2].is_none());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_historical_reads_on_audit_cache() {
    let main = BranchRef::main();
    let manager = RevisionManager::new(strong_config(), None);
    let id = ObjectId::from("1");
    manager.add_revision(Arc::new(revision("1", &main, 1, 100)));
    manager.add_revision(Arc::new(revision("1", &main, 2, 200)));
    manager.add_revision(Arc::new(revision("1", &main, 3, 300)));

    let at = |ts| {
        manager
            .get_revision(&id, &main.point(ts), UNCHUNKED, DEPTH_NONE, false)
            .unwrap()
            .map(|r| r.version())
    };
    assert_eq!(at(99), None);
    assert_eq!(at(150), Some(1));
    assert_eq!(at(199), Some(1));
    assert_eq!(at(200), Some(2));
    assert_eq!(at(UNSPECIFIED_DATE), Some(3));
}

#[test]
fn test_non_audit_cache_keeps_current_only() {
    let config = RevisionManagerConfig {
        supporting_audits: false,
        supporting_branches: false,
        reference_policy: ReferencePolicy::Strong,
        load_on_demand: true,
    };
    let manager = RevisionManager::new(config, None);
    let main = BranchRef::main();
    manager.add_revision(Arc::new(revision("1", &main, 1, 100)));
    manager.add_revision(Arc::new(revision("1", &main, 2, 200)));

    assert_eq!(manager.cache().len(), 1);
    assert!(!manager.contains_revision_by_version(&"1".into(), &main.version(1)));
    assert!(manager.contains_revision(&"1".into(), &main.head()));
}

#[test]
fn test_revise_latest_drops_current() {
    let main = BranchRef::main();
    let manager = RevisionManager::new(strong_config(), None);
    manager.add_revision(Arc::new(revision("1", &main, 1, 100)));
    manager.add_revision(Arc::new(revision("2", &main, 1, 100)));

    manager.revise_latest(&"1".into(), &main);
    assert!(!manager.contains_revision(&"1".into(), &main.head()));
    assert!(manager.contains_revision(&"2".into(), &main.head()));
}

#[test]
fn test_eviction_listener_receives_identity() {
    let cache = create_cache(true, true, ReferencePolicy::Weak);
    let events = Arc::new(Mutex::new(Vec::<EvictionEvent>::new()));
    let sink = events.clone();
    cache.add_eviction_listener(Arc::new(move |e: &EvictionEvent| sink.lock().push(e.clone())));

    let main = BranchRef::main();
    let held = Arc::new(revision("held", &main, 1, 100));
    cache.add_revision(held.clone());
    cache.add_revision(Arc::new(revision("dropped", &main, 1, 100)));
    cache.reap();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, ObjectId::from("dropped"));
    assert_eq!(events[0].version, 1);
    assert!(cache.get_revision_by_version(&"held".into(), &main.version(1)).is_some());
}

#[test]
fn test_all_revisions_grouped_by_branch() {
    let cache = create_cache(true, true, ReferencePolicy::Strong);
    let main = BranchRef::main();
    let child = BranchRef::new(4, "MAIN/a", Some(main.point(150)));
    cache.add_revision(Arc::new(revision("1", &main, 1, 100)));
    cache.add_revision(Arc::new(revision("1", &child, 1, 200)));
    cache.add_revision(Arc::new(revision("2", &child, 1, 200)));

    let all = cache.get_all_revisions();
    assert_eq!(all[&main].len(), 1);
    assert_eq!(all[&child].len(), 2);

    cache.clear();
    assert!(cache.is_empty());
}

proptest! {
    // Adding versions in order always closes the previous one at the next
    // version's creation time minus one.
    #[test]
    fn prop_cache_monotonicity(gaps in proptest::collection::vec(1i64..1_000, 1..20)) {
        let main = BranchRef::main();
        let manager = RevisionManager::new(strong_config(), None);
        let mut created = 100;
        let mut previous: Option<Arc<Revision>> = None;
        for (i, gap) in gaps.iter().enumerate() {
            let next = Arc::new(revision("1", &main, i as i32 + 1, created));
            manager.add_revision(next.clone());
            if let Some(previous) = &previous {
                prop_assert_eq!(previous.revised(), next.created() - 1);
            }
            prop_assert!(!next.is_historical());
            previous = Some(next);
            created += gap;
        }
    }
}
