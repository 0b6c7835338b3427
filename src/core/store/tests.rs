use super::*;
use crate::core::entities::EntityRecord;
use crate::core::hashing::hash_bytes;
use std::collections::BTreeMap;
use tempfile::{tempdir, TempDir};

fn open_store() -> (TempDir, LocalCatalogStore) {
    let tmp = tempdir().unwrap();
    let store = LocalCatalogStore::open(tmp.path()).unwrap();
    (tmp, store)
}

fn new_form(root: &Path, id: &str, version: &str, body: &[u8]) -> NewForm {
    let dir = root.join("forms").join(id).join(version);
    NewForm {
        form_id: id.to_string(),
        version: Some(version.to_string()),
        display_name: id.to_uppercase(),
        content_hash: hash_bytes(body),
        definition_path: dir.join("form.xml"),
        resource_dir: dir.join("media"),
    }
}

#[test]
fn test_insert_assigns_increasing_counter() {
    let (tmp, mut store) = open_store();

    let a = store
        .insert_form(&new_form(tmp.path(), "f", "1", b"one"), &[])
        .unwrap();
    let b = store
        .insert_form(&new_form(tmp.path(), "f", "2", b"two"), &[])
        .unwrap();

    assert!(b.inserted_at > a.inserted_at);
    assert_eq!(a.resource_dir, tmp.path().join("forms/f/1/media"));
    assert!(!a.deleted);
}

#[test]
fn test_paths_are_stored_relative() {
    let (tmp, mut store) = open_store();
    store
        .insert_form(&new_form(tmp.path(), "f", "1", b"one"), &[])
        .unwrap();

    let stored: String = store
        .conn
        .query_row("SELECT resource_dir FROM forms", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, "forms/f/1/media");
}

#[test]
fn test_forms_by_id_sorted_by_counter_not_insert_order() {
    let (tmp, mut store) = open_store();
    store
        .insert_form_at(&new_form(tmp.path(), "f", "1", b"1"), Some(0), &[])
        .unwrap();
    store
        .insert_form_at(&new_form(tmp.path(), "f", "2", b"2"), Some(2), &[])
        .unwrap();
    store
        .insert_form_at(&new_form(tmp.path(), "f", "3", b"3"), Some(1), &[])
        .unwrap();
    store
        .insert_form(&new_form(tmp.path(), "other", "9", b"9"), &[])
        .unwrap();

    let versions: Vec<_> = store
        .forms_by_id("f")
        .unwrap()
        .into_iter()
        .map(|f| f.version.unwrap())
        .collect();
    assert_eq!(versions, vec!["2", "3", "1"]);

    let grouped = store.forms_grouped_by_id().unwrap();
    assert_eq!(grouped["f"][0].version.as_deref(), Some("2"));
    assert_eq!(grouped["other"].len(), 1);
}

#[test]
fn test_soft_delete_keeps_rows_queryable() {
    let (tmp, mut store) = open_store();
    store
        .insert_form(&new_form(tmp.path(), "f", "1", b"1"), &[])
        .unwrap();
    store
        .insert_form(&new_form(tmp.path(), "f", "2", b"2"), &[])
        .unwrap();

    assert_eq!(store.soft_delete("f", Some("1")).unwrap(), 1);
    assert_eq!(store.active_forms_by_id("f").unwrap().len(), 1);
    assert_eq!(store.forms_by_id("f").unwrap().len(), 2);

    assert_eq!(store.soft_delete("f", None).unwrap(), 1);
    assert!(store.active_forms_by_id("f").unwrap().is_empty());
    assert!(store.forms_by_id("f").unwrap().iter().all(|f| f.deleted));
    assert_eq!(store.all_forms(false).unwrap().len(), 0);
    assert_eq!(store.all_forms(true).unwrap().len(), 2);
}

#[test]
fn test_shared_resource_materialized_once() {
    let (_tmp, mut store) = open_store();
    let key = SharedResourceKey::new("people", 3);
    let hash = hash_bytes(b"name\nalice\n");
    let entities = vec![EntityRecord {
        name: "alice".to_string(),
        label: Some("Alice".to_string()),
        properties: BTreeMap::from([("village".to_string(), "North".to_string())]),
    }];

    assert!(!store.is_materialized(&key).unwrap());
    assert!(store
        .materialize_shared_resource(&key, &hash, &entities)
        .unwrap());
    assert!(!store
        .materialize_shared_resource(&key, &hash, &entities)
        .unwrap());

    let resource = store.shared_resource(&key).unwrap().unwrap();
    assert_eq!(resource.entity_count, 1);
    assert_eq!(resource.content_hash, hash);
    assert_eq!(store.entities(&key).unwrap(), entities);
    assert_eq!(store.statistics().unwrap().entities, 1);

    // A different version is a different resource
    assert!(!store
        .is_materialized(&SharedResourceKey::new("people", 4))
        .unwrap());
}

#[test]
fn test_form_shared_resource_associations() {
    let (tmp, mut store) = open_store();
    let keys = vec![
        SharedResourceKey::new("people", 3),
        SharedResourceKey::new("places", 1),
    ];
    let form = store
        .insert_form(&new_form(tmp.path(), "f", "1", b"1"), &keys)
        .unwrap();

    assert_eq!(store.shared_resources_for_form(form.row_id).unwrap(), keys);
}

#[test]
fn test_reopen_preserves_data() {
    let tmp = tempdir().unwrap();
    {
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        store
            .insert_form(&new_form(tmp.path(), "f", "1", b"1"), &[])
            .unwrap();
    }
    let store = LocalCatalogStore::open(tmp.path()).unwrap();
    assert_eq!(store.all_forms(true).unwrap().len(), 1);
}

#[test]
fn test_schema_mismatch_with_forms_is_an_error() {
    let tmp = tempdir().unwrap();
    {
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        store
            .insert_form(&new_form(tmp.path(), "f", "1", b"1"), &[])
            .unwrap();
        store
            .conn
            .execute("UPDATE schema_version SET version = 99", [])
            .unwrap();
    }

    let err = LocalCatalogStore::open(tmp.path()).err().unwrap();
    assert_eq!(
        err,
        StoreError::SchemaMismatch {
            found: 99,
            expected: SCHEMA_VERSION
        }
    );
}

#[test]
fn test_schema_mismatch_without_forms_reinitializes() {
    let tmp = tempdir().unwrap();
    {
        let store = LocalCatalogStore::open(tmp.path()).unwrap();
        store
            .conn
            .execute("UPDATE schema_version SET version = 0", [])
            .unwrap();
    }

    let store = LocalCatalogStore::open(tmp.path()).unwrap();
    assert_eq!(store.stored_schema_version(), SCHEMA_VERSION);
}

#[test]
fn test_statistics() {
    let (tmp, mut store) = open_store();
    store
        .insert_form(&new_form(tmp.path(), "a", "1", b"1"), &[])
        .unwrap();
    store
        .insert_form(&new_form(tmp.path(), "a", "2", b"2"), &[])
        .unwrap();
    store
        .insert_form(&new_form(tmp.path(), "b", "1", b"3"), &[])
        .unwrap();
    store.soft_delete("a", Some("1")).unwrap();

    let stats = store.statistics().unwrap();
    assert_eq!(stats.active_forms, 2);
    assert_eq!(stats.deleted_forms, 1);
    assert_eq!(stats.distinct_form_ids, 2);
}
