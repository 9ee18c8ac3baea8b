//! Indexed store: durable collections with secondary indexes
//!
//! Records are JSON documents; the typed API (`add`, `update`, `get`, ...)
//! converts entity models to and from documents and goes through the same
//! document operations. Every mutating call is one SQLite transaction that
//! covers the record row and all of its index rows.
use crate::error::{Error, Result};
use crate::index;
use crate::migration::{MigrationManager, MigrationReport};
use crate::registry::{CollectionSchema, Document, SchemaRegistry};
use crate::schema::table_name;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rusqlite::Connection;
use tracing::instrument;
use vault_core::{Collection, Entity, RecordId, StoreConfig};

/// Fields owned by the store; callers cannot set them
const RESERVED_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// A handle to the vault store backed by SQLite
///
/// Opening runs pending migrations before the handle is returned, so every
/// handle sees records in the latest shape. Clones share one connection.
#[derive(Clone)]
pub struct VaultStore {
    conn: Arc<Connection>,
    registry: SchemaRegistry,
    path: PathBuf,
}

impl VaultStore {
    /// Open or create a store at the given path with the built-in schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_registry(db_path, SchemaRegistry::builtin()).await
    }

    /// Open the store described by a `[store]` config section
    ///
    /// Creates the parent directory of the database file if needed.
    pub async fn open_from_config(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::open(&config.path).await
    }

    /// Open or create a store, migrating it to `registry`'s latest version
    ///
    /// Fails with `MigrationFailed` if a patch step errors; the store then
    /// stays at the last version that completed.
    #[instrument(skip_all, fields(db_path = %db_path.display()))]
    pub async fn open_with_registry(db_path: &Path, registry: SchemaRegistry) -> Result<Self> {
        tracing::info!("Opening vault store at {}", db_path.display());

        let path = db_path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || -> Result<MigrationReport> {
            let mut conn = rusqlite::Connection::open(&path)?;
            MigrationManager::migrate(&mut conn, &registry)
        })
        .await
        .map_err(|e| Error::database(format!("Migration task failed: {e}")))??;

        if !report.is_noop() {
            tracing::info!(
                "Migrated store from v{} to v{} ({} records patched)",
                report.from,
                report.to,
                report.records_patched
            );
        }

        let conn = Connection::open(db_path)
            .await
            .map_err(|e| Error::database(format!("Failed to open database: {e}")))?;

        tracing::info!("Vault store opened successfully");
        Ok(Self { conn: Arc::new(conn), registry, path: db_path.to_path_buf() })
    }

    /// Close the store
    ///
    /// Only the last handle actually closes the connection; other clones keep
    /// it alive.
    pub async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn
                .close()
                .await
                .map_err(|e| Error::database(format!("Failed to close database: {e}"))),
            Err(_) => Ok(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Schema version recorded in the database
    pub async fn schema_version(&self) -> Result<u32> {
        let version = self
            .conn
            .call(|conn| {
                let version: Option<u32> =
                    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(version.unwrap_or(0))
            })
            .await?;
        Ok(version)
    }

    fn schema(&self, collection: Collection) -> Result<&'static CollectionSchema> {
        self.registry
            .current(collection)
            .ok_or_else(|| Error::invalid_record(collection, "collection is not declared in the schema registry"))
    }

    /// Insert a document, returning its new identity
    ///
    /// Stamps `created_at` and `updated_at` with the same instant.
    #[instrument(skip(self, doc), fields(%collection))]
    pub async fn insert_document(&self, collection: Collection, mut doc: Document) -> Result<RecordId> {
        let schema = self.schema(collection)?;

        for field in RESERVED_FIELDS {
            doc.remove(*field);
        }
        normalize_tags(collection, &mut doc, true)?;
        check_required(collection, &doc, schema)?;

        let now = timestamp(Utc::now())?;
        doc.insert("created_at".to_string(), now.clone());
        doc.insert("updated_at".to_string(), now);

        let table = table_name(collection);
        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    &format!("INSERT INTO {table} (doc) VALUES (?1)"),
                    params![Value::Object(doc.clone())],
                )?;
                let id = tx.last_insert_rowid();
                index::insert_entries(&tx, collection, id, &doc, schema)?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(id)
            })
            .await?;

        tracing::debug!(id, "Record inserted");
        Ok(id)
    }

    /// Merge `partial` into a stored document
    ///
    /// Fields absent from `partial` are untouched and an explicit `null`
    /// clears a field. `id` and `created_at` cannot change; `updated_at` is
    /// always refreshed and never moves backwards.
    #[instrument(skip(self, partial), fields(%collection, id))]
    pub async fn update_document(&self, collection: Collection, id: RecordId, mut partial: Document) -> Result<()> {
        let schema = self.schema(collection)?;

        for field in RESERVED_FIELDS {
            partial.remove(*field);
        }
        normalize_tags(collection, &mut partial, false)?;
        for field in schema.required {
            if partial.get(*field).is_some_and(Value::is_null) {
                return Err(Error::invalid_record(collection, format!("required field '{field}' cannot be cleared")));
            }
        }

        let table = table_name(collection);
        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(mut doc) = read_document(&tx, table, id)? else {
                    return Ok::<_, rusqlite::Error>(false);
                };

                let previous = doc.get("updated_at").and_then(parse_timestamp);
                doc.extend(partial);
                doc.insert("updated_at".to_string(), next_timestamp(previous));

                write_document(&tx, table, id, &doc)?;
                index::reindex(&tx, collection, id, &doc, schema)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !updated {
            return Err(Error::not_found(collection, id));
        }
        tracing::debug!("Record updated");
        Ok(())
    }

    /// Hard-delete a record and its index rows
    ///
    /// Records referring to it are left as they are.
    #[instrument(skip(self), fields(%collection, id))]
    pub async fn delete_document(&self, collection: Collection, id: RecordId) -> Result<()> {
        let table = table_name(collection);
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let rows = tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
                if rows > 0 {
                    index::remove_entries(&tx, collection, id)?;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(rows > 0)
            })
            .await?;

        if !deleted {
            return Err(Error::not_found(collection, id));
        }
        tracing::debug!("Record deleted");
        Ok(())
    }

    /// Point lookup; the returned document carries its `id`
    #[instrument(skip(self), fields(%collection, id))]
    pub async fn get_document(&self, collection: Collection, id: RecordId) -> Result<Option<Document>> {
        let table = table_name(collection);
        let raw = self
            .conn
            .call(move |conn| {
                let raw: Option<String> = conn
                    .prepare_cached(&format!("SELECT doc FROM {table} WHERE id = ?1"))?
                    .query_row(params![id], |row| row.get(0))
                    .optional()?;
                Ok::<_, rusqlite::Error>(raw)
            })
            .await?;

        raw.map(|raw| with_id(collection, id, &raw)).transpose()
    }

    /// All documents, optionally restricted to one owner, in insertion order
    #[instrument(skip(self), fields(%collection))]
    pub async fn scan_documents(&self, collection: Collection, owner: Option<&str>) -> Result<Vec<Document>> {
        match owner {
            Some(owner) => self.scan_by_attribute(collection, "owner_id", owner).await,
            None => self.scan_all(collection).await,
        }
    }

    async fn scan_all(&self, collection: Collection) -> Result<Vec<Document>> {
        let table = table_name(collection);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!("SELECT id, doc FROM {table} ORDER BY id"))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(RecordId, String)>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;
        decode_rows(collection, rows)
    }

    /// Documents whose `attribute` has index key `key`, in insertion order
    ///
    /// Served from the secondary index when the attribute is declared;
    /// otherwise falls back to a scan with in-memory matching.
    pub async fn scan_by_attribute(&self, collection: Collection, attribute: &str, key: &str) -> Result<Vec<Document>> {
        let schema = self.schema(collection)?;

        if !schema.is_indexed(attribute) {
            tracing::debug!(%collection, attribute, "Attribute not indexed, scanning");
            let docs = self.scan_all(collection).await?;
            return Ok(docs
                .into_iter()
                .filter(|doc| doc.get(attribute).and_then(index::index_key).as_deref() == Some(key))
                .collect());
        }

        let table = table_name(collection);
        let attribute = attribute.to_owned();
        let key = key.to_owned();
        let rows = self
            .conn
            .call(move |conn| {
                let ids = index::lookup(conn, collection, &attribute, &key)?;
                let mut stmt = conn.prepare_cached(&format!("SELECT doc FROM {table} WHERE id = ?1"))?;
                let mut rows: Vec<(RecordId, String)> = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(raw) = stmt.query_row(params![id], |row| row.get(0)).optional()? {
                        rows.push((id, raw));
                    }
                }
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;

        decode_rows(collection, rows)
    }

    /// Documents carrying any of `tags`, optionally for one owner, in insertion order
    ///
    /// Requires `tags` (and `owner_id` when filtering by owner) to be indexed;
    /// returns `None` when they are not so callers can fall back to a scan.
    pub async fn scan_tagged(
        &self, collection: Collection, owner: Option<&str>, tags: &[String],
    ) -> Result<Option<Vec<Document>>> {
        let schema = self.schema(collection)?;
        if !schema.is_indexed("tags") || (owner.is_some() && !schema.is_indexed("owner_id")) {
            return Ok(None);
        }
        if tags.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let table = table_name(collection);
        let placeholders = vec!["?"; tags.len()].join(", ");
        let mut sql = format!(
            r#"
            SELECT t.id, t.doc FROM {table} t
            WHERE t.id IN (
                SELECT record_id FROM record_index
                WHERE collection = ? AND attribute = 'tags' AND value IN ({placeholders})
            )
            "#
        );

        let mut values: Vec<String> = Vec::with_capacity(tags.len() + 3);
        values.push(collection.as_str().to_string());
        values.extend(tags.iter().cloned());

        if let Some(owner) = owner {
            sql.push_str(
                "AND t.id IN (SELECT record_id FROM record_index WHERE collection = ? AND attribute = 'owner_id' AND value = ?)\n",
            );
            values.push(collection.as_str().to_string());
            values.push(owner.to_string());
        }
        sql.push_str("ORDER BY t.id");

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values.iter()), |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(RecordId, String)>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;

        decode_rows(collection, rows).map(Some)
    }

    /// Distinct index keys of `attribute` across `collections`, ascending
    ///
    /// Returns `None` if any of the collections does not index the attribute
    /// (or `owner_id` when an owner is given).
    pub async fn distinct_keys(
        &self, collections: &[Collection], attribute: &str, owner: Option<&str>,
    ) -> Result<Option<Vec<String>>> {
        for &collection in collections {
            let schema = self.schema(collection)?;
            if !schema.is_indexed(attribute) || (owner.is_some() && !schema.is_indexed("owner_id")) {
                return Ok(None);
            }
        }
        if collections.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let placeholders = vec!["?"; collections.len()].join(", ");
        let mut sql = format!(
            "SELECT DISTINCT i.value FROM record_index i WHERE i.attribute = ? AND i.collection IN ({placeholders})\n"
        );
        let mut values: Vec<String> = vec![attribute.to_string()];
        values.extend(collections.iter().map(|c| c.as_str().to_string()));

        if let Some(owner) = owner {
            sql.push_str(
                r#"AND EXISTS (
                    SELECT 1 FROM record_index o
                    WHERE o.collection = i.collection AND o.record_id = i.record_id
                      AND o.attribute = 'owner_id' AND o.value = ?
                )
                "#,
            );
            values.push(owner.to_string());
        }
        sql.push_str("ORDER BY i.value");

        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let keys = stmt
                    .query_map(params_from_iter(values.iter()), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok::<_, rusqlite::Error>(keys)
            })
            .await?;

        Ok(Some(keys))
    }

    /// Set `last_accessed` to now without touching `updated_at`
    #[instrument(skip(self), fields(%collection, id))]
    pub async fn touch(&self, collection: Collection, id: RecordId) -> Result<()> {
        let schema = self.schema(collection)?;
        let table = table_name(collection);
        let now = timestamp(Utc::now())?;

        let touched = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(mut doc) = read_document(&tx, table, id)? else {
                    return Ok::<_, rusqlite::Error>(false);
                };
                doc.insert("last_accessed".to_string(), now);
                write_document(&tx, table, id, &doc)?;
                index::reindex(&tx, collection, id, &doc, schema)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !touched {
            return Err(Error::not_found(collection, id));
        }
        Ok(())
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let table = table_name(collection);
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(count)
            })
            .await?;
        Ok(count as usize)
    }

    /// Remove every record (and index row) of the given collections
    ///
    /// Identities are still never reused afterwards.
    #[instrument(skip(self))]
    pub async fn clear(&self, collections: &[Collection]) -> Result<()> {
        let collections = collections.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for collection in collections {
                    tx.execute(&format!("DELETE FROM {}", table_name(collection)), [])?;
                    index::clear_collection(&tx, collection)?;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await?;

        tracing::info!("Collections cleared");
        Ok(())
    }

    /// Insert a typed record
    pub async fn add<E: Entity>(&self, new: E::New) -> Result<RecordId> {
        let doc = to_document(E::COLLECTION, &new)?;
        self.insert_document(E::COLLECTION, doc).await
    }

    /// Apply a typed partial update
    pub async fn update<E: Entity>(&self, id: RecordId, patch: E::Patch) -> Result<()> {
        let doc = to_document(E::COLLECTION, &patch)?;
        self.update_document(E::COLLECTION, id, doc).await
    }

    pub async fn delete<E: Entity>(&self, id: RecordId) -> Result<()> {
        self.delete_document(E::COLLECTION, id).await
    }

    pub async fn get<E: Entity>(&self, id: RecordId) -> Result<Option<E>> {
        self.get_document(E::COLLECTION, id).await?.map(from_document).transpose()
    }

    /// Typed records, optionally restricted to one owner, in insertion order
    pub async fn scan<E: Entity>(&self, owner: Option<&str>) -> Result<Vec<E>> {
        from_documents(self.scan_documents(E::COLLECTION, owner).await?)
    }
}

pub(crate) fn to_document<T: Serialize>(collection: Collection, value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(Error::invalid_record(collection, format!("expected an object, got {other}"))),
    }
}

pub(crate) fn from_document<E: Entity>(doc: Document) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

pub(crate) fn from_documents<E: Entity>(docs: Vec<Document>) -> Result<Vec<E>> {
    docs.into_iter().map(from_document).collect()
}

fn check_required(collection: Collection, doc: &Document, schema: &CollectionSchema) -> Result<()> {
    for field in schema.required {
        match doc.get(*field) {
            None | Some(Value::Null) => {
                return Err(Error::invalid_record(collection, format!("missing required field '{field}'")));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Collapse duplicate tags (first occurrence wins) and reject non-string tags
///
/// On insert an absent or null tag list becomes an empty one; in a partial
/// update an explicit null clears the tags.
fn normalize_tags(collection: Collection, doc: &mut Document, fill_missing: bool) -> Result<()> {
    let tags = match doc.get("tags") {
        None if !fill_missing => return Ok(()),
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut tags: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !item.is_string() {
                    return Err(Error::invalid_record(collection, format!("tag {item} is not a string")));
                }
                if !tags.contains(item) {
                    tags.push(item.clone());
                }
            }
            tags
        }
        Some(other) => {
            return Err(Error::invalid_record(collection, format!("tags must be an array, got {other}")));
        }
    };
    doc.insert("tags".to_string(), Value::Array(tags));
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> Result<Value> {
    Ok(serde_json::to_value(at)?)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current time, bumped past `previous` when the clock has not advanced
fn next_timestamp(previous: Option<DateTime<Utc>>) -> Value {
    let now = Utc::now();
    let at = match previous {
        Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
        _ => now,
    };
    Value::String(at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
}

fn read_document(conn: &rusqlite::Connection, table: &str, id: RecordId) -> rusqlite::Result<Option<Document>> {
    let raw: Option<String> = conn
        .prepare_cached(&format!("SELECT doc FROM {table} WHERE id = ?1"))?
        .query_row(params![id], |row| row.get(0))
        .optional()?;

    raw.map(|raw| match serde_json::from_str(&raw) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(other) => Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("record {id} is not an object: {other}").into(),
        )),
        Err(e) => Err(rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))),
    })
    .transpose()
}

fn write_document(conn: &rusqlite::Connection, table: &str, id: RecordId, doc: &Document) -> rusqlite::Result<()> {
    let raw = serde_json::to_string(doc).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.prepare_cached(&format!("UPDATE {table} SET doc = ?1 WHERE id = ?2"))?
        .execute(params![raw, id])?;
    Ok(())
}

fn with_id(collection: Collection, id: RecordId, raw: &str) -> Result<Document> {
    match serde_json::from_str(raw)? {
        Value::Object(mut doc) => {
            doc.insert("id".to_string(), Value::from(id));
            Ok(doc)
        }
        other => Err(Error::database(format!("{collection} record {id} is not an object: {other}"))),
    }
}

fn decode_rows(collection: Collection, rows: Vec<(RecordId, String)>) -> Result<Vec<Document>> {
    rows.into_iter().map(|(id, raw)| with_id(collection, id, &raw)).collect()
}
