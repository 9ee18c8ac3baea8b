//! Secondary index maintenance
//!
//! Every declared attribute of a record contributes rows to `record_index`:
//! scalars one row, arrays one row per element, null/absent nothing. All
//! functions here run on a caller-supplied connection or transaction so that
//! index rows always change in the same transaction as the record itself.

use crate::registry::{CollectionSchema, Document};

use rusqlite::{Connection, params};
use serde_json::Value;
use vault_core::{Collection, RecordId};

/// Index key for a scalar JSON value
///
/// Strings are used verbatim, numbers and booleans in their JSON text form.
pub fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// (attribute, key) pairs a document contributes under `schema`
pub fn entries(doc: &Document, schema: &CollectionSchema) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();

    for &attribute in schema.indexed {
        match doc.get(attribute) {
            Some(Value::Array(items)) => {
                let mut keys: Vec<String> = items.iter().filter_map(index_key).collect();
                keys.sort();
                keys.dedup();
                out.extend(keys.into_iter().map(|k| (attribute, k)));
            }
            Some(value) => {
                if let Some(key) = index_key(value) {
                    out.push((attribute, key));
                }
            }
            None => {}
        }
    }

    out
}

/// Add the index rows for one record
pub fn insert_entries(
    conn: &Connection, collection: Collection, id: RecordId, doc: &Document, schema: &CollectionSchema,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO record_index (collection, attribute, value, record_id) VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut written = 0;
    for (attribute, key) in entries(doc, schema) {
        written += stmt.execute(params![collection.as_str(), attribute, key, id])?;
    }
    Ok(written)
}

/// Drop every index row of one record
pub fn remove_entries(conn: &Connection, collection: Collection, id: RecordId) -> rusqlite::Result<usize> {
    conn.prepare_cached("DELETE FROM record_index WHERE collection = ?1 AND record_id = ?2")?
        .execute(params![collection.as_str(), id])
}

/// Replace the index rows of one record after its document changed
pub fn reindex(
    conn: &Connection, collection: Collection, id: RecordId, doc: &Document, schema: &CollectionSchema,
) -> rusqlite::Result<()> {
    remove_entries(conn, collection, id)?;
    insert_entries(conn, collection, id, doc, schema)?;
    Ok(())
}

/// Drop every index row of a collection
pub fn clear_collection(conn: &Connection, collection: Collection) -> rusqlite::Result<usize> {
    conn.prepare_cached("DELETE FROM record_index WHERE collection = ?1")?
        .execute(params![collection.as_str()])
}

/// Record ids carrying `key` under `attribute`, ascending
pub fn lookup(
    conn: &Connection, collection: Collection, attribute: &str, key: &str,
) -> rusqlite::Result<Vec<RecordId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT record_id FROM record_index WHERE collection = ?1 AND attribute = ?2 AND value = ?3 ORDER BY record_id",
    )?;
    let ids = stmt
        .query_map(params![collection.as_str(), attribute, key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<RecordId>>>()?;
    Ok(ids)
}
