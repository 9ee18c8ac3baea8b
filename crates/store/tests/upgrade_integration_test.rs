//! Opening stores written by older schema versions through the public API

use rusqlite::{Connection, params};
use serde_json::json;
use tempfile::TempDir;
use vault_core::{File, Folder, NewFolder, NewNote, Note};
use vault_store::{Error, MigrationManager, SCHEMA_VERSION, SchemaRegistry, SearchFilters, VaultStore};

/// Create a store that stopped at `version` and insert raw documents into it
fn seed_store(db_path: &std::path::Path, version: u32, rows: &[(&str, serde_json::Value)]) {
    let mut conn = Connection::open(db_path).unwrap();
    MigrationManager::migrate_to(&mut conn, &SchemaRegistry::builtin(), version).unwrap();
    for (table, doc) in rows {
        conn.execute(&format!("INSERT INTO {table} (doc) VALUES (?1)"), params![doc.to_string()])
            .unwrap();
    }
}

#[tokio::test]
async fn v1_store_is_upgraded_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(
        &db_path,
        1,
        &[
            (
                "notes",
                json!({
                    "title": "Legacy",
                    "content": "old ciphertext",
                    "encrypted": true,
                    "owner_id": "u1",
                    "created_at": "2023-05-01T10:00:00Z",
                    "updated_at": "2023-05-01T10:00:00Z"
                }),
            ),
            (
                "files",
                json!({
                    "name": "scan.pdf",
                    "mime_type": "application/pdf",
                    "size": 3,
                    "data": "AQID",
                    "encrypted": false,
                    "owner_id": "u1",
                    "created_at": "2023-05-01T10:00:00Z",
                    "updated_at": "2023-05-01T10:00:00Z"
                }),
            ),
        ],
    );

    let store = VaultStore::open(&db_path).await.unwrap();
    assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);

    let notes = store.list_by_owner::<Note>(Some("u1")).await.unwrap();
    assert_eq!(notes.len(), 1);
    let note = &notes[0];
    assert_eq!(note.title, "Legacy");
    assert!(note.tags.is_empty());
    assert_eq!(note.folder_id, None);
    assert!(!note.is_private);
    assert_eq!(note.created_at.to_rfc3339(), "2023-05-01T10:00:00+00:00");

    let files = store.list_by_owner::<File>(Some("u1")).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].data, vec![1, 2, 3]);
    assert!(files[0].tags.is_empty());

    assert!(store.all_tags(Some("u1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn upgraded_records_are_searchable_by_new_attributes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(
        &db_path,
        2,
        &[(
            "notes",
            json!({
                "title": "Tagged before folders",
                "content": "",
                "encrypted": false,
                "tags": ["work", "work", "todo"],
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }),
        )],
    );

    let store = VaultStore::open(&db_path).await.unwrap();

    let hits: Vec<Note> = store.search(None, &SearchFilters::tags(["todo"])).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tags, vec!["work", "todo"]);
    assert_eq!(store.all_tags(None).await.unwrap(), vec!["todo", "work"]);

    let folder = store.add::<Folder>(NewFolder::new("Projects")).await.unwrap();
    let id = store.add::<Note>(NewNote::new("Fresh", "").in_folder(folder)).await.unwrap();
    let in_folder = store.notes_in_folder(folder).await.unwrap();
    assert_eq!(in_folder.iter().map(|n| n.id).collect::<Vec<_>>(), vec![id]);
}

#[tokio::test]
async fn malformed_legacy_record_fails_open_and_keeps_version() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(
        &db_path,
        1,
        &[(
            "notes",
            json!({
                "title": "Broken",
                "content": "",
                "encrypted": false,
                "tags": "not-a-list"
            }),
        )],
    );

    let err = VaultStore::open(&db_path).await.err().unwrap();
    match err {
        Error::MigrationFailed { version, .. } => assert_eq!(version, 2),
        other => panic!("expected MigrationFailed, got {other:?}"),
    }

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), 1);
}

#[tokio::test]
async fn store_from_newer_build_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(&db_path, SCHEMA_VERSION, &[]);
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION + 1])
            .unwrap();
    }

    let err = VaultStore::open(&db_path).await.err().unwrap();
    assert!(matches!(err, Error::UnsupportedVersion { found, latest } if found == SCHEMA_VERSION + 1 && latest == SCHEMA_VERSION));
}

#[tokio::test]
async fn legacy_duplicate_tags_collapse_during_upgrade() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(
        &db_path,
        1,
        &[(
            "notes",
            json!({
                "title": "Doubled",
                "content": "",
                "encrypted": false,
                "tags": ["work", "home", "work"],
                "created_at": "2023-05-01T10:00:00Z",
                "updated_at": "2023-05-01T10:00:00Z"
            }),
        )],
    );

    let store = VaultStore::open(&db_path).await.unwrap();
    let notes = store.list_by_owner::<Note>(None).await.unwrap();
    assert_eq!(notes[0].tags, vec!["work", "home"]);
    assert_eq!(store.all_tags(None).await.unwrap(), vec!["home", "work"]);
}

#[tokio::test]
async fn legacy_non_string_tag_fails_open_instead_of_breaking_reads() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vault.db");
    seed_store(
        &db_path,
        1,
        &[(
            "notes",
            json!({
                "title": "Mixed",
                "content": "",
                "encrypted": false,
                "tags": ["a", 1],
                "created_at": "2023-05-01T10:00:00Z",
                "updated_at": "2023-05-01T10:00:00Z"
            }),
        )],
    );

    let err = VaultStore::open(&db_path).await.err().unwrap();
    match err {
        Error::MigrationFailed { version, reason, .. } => {
            assert_eq!(version, 2);
            assert!(reason.contains("not a string"));
        }
        other => panic!("expected MigrationFailed, got {other:?}"),
    }

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), 1);
}
