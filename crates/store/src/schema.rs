//! SQLite layout for the vault store
//!
//! Records live as JSON documents in one table per collection. Identities
//! come from `AUTOINCREMENT`, so an id is never handed out twice, even after
//! a delete or a full clear. Secondary indexes for every collection share the
//! `record_index` table: one row per (attribute value, record) pair.

use vault_core::Collection;

/// SQL to create the schema version table
pub const SCHEMA_VERSION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQL to create the primary record tables
pub const RECORDS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doc TEXT NOT NULL CHECK (json_valid(doc))
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doc TEXT NOT NULL CHECK (json_valid(doc))
);

CREATE TABLE IF NOT EXISTS folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doc TEXT NOT NULL CHECK (json_valid(doc))
);
"#;

/// SQL to create the shared secondary index table
///
/// Lookups go (collection, attribute, value) -> record ids; maintenance on
/// update/delete goes through (collection, record_id).
pub const RECORD_INDEX_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    attribute TEXT NOT NULL,
    value TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    PRIMARY KEY (collection, attribute, value, record_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_record_index_record
ON record_index(collection, record_id);
"#;

/// Table holding the documents of a collection
pub fn table_name(collection: Collection) -> &'static str {
    match collection {
        Collection::Notes => "notes",
        Collection::Files => "files",
        Collection::Folders => "folders",
    }
}

/// Attribute carrying a record's weak folder reference
pub fn folder_attribute(collection: Collection) -> &'static str {
    match collection {
        Collection::Folders => "parent_id",
        Collection::Notes | Collection::Files => "folder_id",
    }
}
