use std::sync::Arc;

use serde_json::json;
use strata::{
    branch::{Branch, BranchManager, Metadata},
    store::{BranchStore, InMemoryBranchStore, Params, Script},
};

#[test]
fn test_store_lifecycle() {
    let store = InMemoryBranchStore::new();
    assert!(!store.exists());
    assert!(store.get("MAIN").is_err());

    store.create().unwrap();
    assert!(store.exists());
    assert!(store.create().is_err());

    let main = Branch::main(0).unwrap();
    store.put(main.path(), &main).unwrap();
    assert_eq!(store.get("MAIN").unwrap(), Some(main));
    assert_eq!(store.get("MAIN/x").unwrap(), None);

    store.delete().unwrap();
    assert!(!store.exists());
}

#[test]
fn test_scripts_update_single_fields() {
    let store = InMemoryBranchStore::with_collection();
    let main = Branch::main(100).unwrap();
    store.put(main.path(), &main).unwrap();

    let mut params = Params::new();
    params.insert("headTimestamp".to_string(), json!(250));
    store.update("MAIN", Script::WithHeadTimestamp, &params).unwrap();

    let mut params = Params::new();
    params.insert("metadata".to_string(), json!({"owner": "alice"}));
    store.update("MAIN", Script::WithMetadata, &params).unwrap();

    let updated = store.get("MAIN").unwrap().unwrap();
    assert_eq!(updated.head_timestamp(), 250);
    assert_eq!(updated.metadata().get("owner"), Some(&json!("alice")));
    assert_eq!(updated.base_timestamp(), 100);
}

#[test]
fn test_script_errors() {
    let store = InMemoryBranchStore::with_collection();
    let err = store
        .update("MAIN", Script::WithDeleted, &Params::new())
        .unwrap_err();
    assert!(err.is_not_found());

    let main = Branch::main(0).unwrap();
    store.put(main.path(), &main).unwrap();
    let err = store
        .update("MAIN", Script::WithMetadata, &Params::new())
        .unwrap_err();
    assert_eq!(err.module(), "store");

    assert!("withSomethingElse".parse::<Script>().is_err());
    assert_eq!("withDeleted".parse::<Script>().unwrap(), Script::WithDeleted);
}

#[test]
fn test_serialized_branch_shape() {
    let manager = BranchManager::open(Arc::new(InMemoryBranchStore::new())).unwrap();
    let child = manager.create_child("MAIN", "a", Metadata::new()).unwrap();
    let value = serde_json::to_value(&child).unwrap();
    for field in [
        "type",
        "name",
        "parentPath",
        "baseTimestamp",
        "headTimestamp",
        "deleted",
        "metadata",
        "path",
        "segmentId",
        "segments",
        "parentSegments",
        "cdoBranchId",
    ] {
        assert!(value.get(field).is_some(), "missing field {field}");
    }

    let main = serde_json::to_value(manager.main_branch().unwrap()).unwrap();
    assert_eq!(main["path"], json!("MAIN"));
    assert_eq!(main["parentPath"], json!(""));
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("branches.json");

    let store = Arc::new(InMemoryBranchStore::new());
    let manager = BranchManager::open(store.clone()).unwrap();
    let child = manager.create_child("MAIN", "a", Metadata::new()).unwrap();
    store.save_to_file(&path).unwrap();

    let loaded = Arc::new(InMemoryBranchStore::load_from_file(&path).unwrap());
    let reopened = BranchManager::open(loaded).unwrap();
    assert_eq!(reopened.get_branch("MAIN/a").unwrap(), child);
    assert_eq!(reopened.all_branches().len(), 2);
}

#[test]
fn test_load_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryBranchStore::load_from_file(dir.path().join("missing.json")).unwrap();
    assert!(!store.exists());
}

#[test]
fn test_load_rejects_unknown_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("branches.json");
    std::fs::write(&path, r#"{"_v": 9, "branches": {}}"#).unwrap();
    let err = InMemoryBranchStore::load_from_file(&path).unwrap_err();
    assert!(err.is_io_error());
}
