use std::sync::Arc;

use strata::{
    FixedClock, Repository, RepositoryConfig,
    branch::BranchManager,
    revision::{BranchRef, Feature, ObjectType, Revision, RevisionManagerConfig, cache::ReferencePolicy},
    store::InMemoryBranchStore,
};

/// Base timestamp of `MAIN` in every test fixture.
pub const MAIN_BASE: i64 = 1_000;

/// A branch manager over a fresh in-memory store with a deterministic clock.
pub fn test_manager() -> BranchManager {
    BranchManager::open_with_clock(
        Arc::new(InMemoryBranchStore::new()),
        Arc::new(FixedClock::new(10_000)),
        MAIN_BASE,
    )
    .expect("Failed to open branch manager")
}

/// Revision manager settings with strong references, so nothing is evicted
/// behind a test's back.
pub fn strong_config() -> RevisionManagerConfig {
    RevisionManagerConfig {
        reference_policy: ReferencePolicy::Strong,
        ..Default::default()
    }
}

/// A repository over in-memory stores with a deterministic clock.
pub fn test_repository() -> Repository {
    test_repository_with_clock().0
}

/// Like [`test_repository`], also returning the clock so a test can freeze it.
pub fn test_repository_with_clock() -> (Repository, Arc<FixedClock>) {
    let config = RepositoryConfig {
        revision: strong_config(),
        main_base_timestamp: MAIN_BASE,
    };
    let clock = Arc::new(FixedClock::new(10_000));
    let repo = Repository::open(config, Arc::new(InMemoryBranchStore::new()), clock.clone())
        .expect("Failed to open repository");
    (repo, clock)
}

/// The object type used throughout the tests.
pub fn concept_type() -> Arc<ObjectType> {
    Arc::new(ObjectType::new(
        "Concept",
        vec![
            Feature::attribute("active"),
            Feature::attribute("module"),
            Feature::attribute("terms").many(),
            Feature::reference("parents").many().unordered(),
        ],
    ))
}

/// A concept template for commits; branch, version and timestamps are
/// assigned by the repository.
pub fn concept(id: &str, active: bool) -> Revision {
    Revision::new(concept_type(), id, BranchRef::main(), 0, 0).with_value("active", active)
}

/// A concept with the given terms.
pub fn concept_with_terms(id: &str, terms: &[&str]) -> Revision {
    concept(id, true).with_list("terms", terms.iter().copied())
}
