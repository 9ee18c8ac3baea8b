//! Schema migration logic for the vault store
//!
//! Tracks the reached schema version and applies pending registry steps in
//! ascending order. One step is one SQLite transaction: patch every record of
//! the collections the step names, rebuild their secondary indexes, record the
//! version. A failed or interrupted step leaves nothing behind, so the next
//! open resumes exactly at that step.

use crate::error::{Error, Result};
use crate::index;
use crate::registry::{CollectionSchema, Document, SchemaRegistry, SchemaVersion};
use crate::schema::{RECORD_INDEX_SQL, RECORDS_SQL, SCHEMA_VERSION_SQL, table_name};

use rusqlite::{Connection, Transaction, params};
use serde_json::Value;
use tracing::{debug, info, trace};
use vault_core::RecordId;

/// Outcome of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version recorded before the run
    pub from: u32,
    /// Version recorded after the run
    pub to: u32,
    /// Records whose document changed
    pub records_patched: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Manages schema migrations for the vault store
pub struct MigrationManager;

impl MigrationManager {
    /// Create the version, record and index tables if missing
    pub fn ensure_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_VERSION_SQL)
            .and_then(|_| conn.execute_batch(RECORDS_SQL))
            .and_then(|_| conn.execute_batch(RECORD_INDEX_SQL))
            .map_err(|e| Error::database(format!("Failed to create tables: {e}")))
    }

    /// Get the current schema version from the database
    ///
    /// Returns 0 if the schema_version table doesn't exist or is empty.
    pub fn get_current_version(conn: &Connection) -> Result<u32> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(format!("Failed to check schema_version table: {e}")))?;

        if !table_exists {
            trace!("schema_version table does not exist, returning version 0");
            return Ok(0);
        }

        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .map_err(|e| Error::database(format!("Failed to query schema version: {e}")))?;

        Ok(version.unwrap_or(0))
    }

    /// Apply every pending step up to the registry's latest version
    ///
    /// Running it again on a migrated store is a no-op.
    pub fn migrate(conn: &mut Connection, registry: &SchemaRegistry) -> Result<MigrationReport> {
        Self::migrate_to(conn, registry, registry.latest_version())
    }

    /// Apply pending steps up to and including `target`
    pub fn migrate_to(conn: &mut Connection, registry: &SchemaRegistry, target: u32) -> Result<MigrationReport> {
        registry.validate()?;

        let latest = registry.latest_version();
        if target > latest {
            return Err(Error::InvalidRegistry(format!(
                "target version {} is beyond latest {}",
                target, latest
            )));
        }

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| Error::database(format!("Failed to set journal mode: {e}")))?;
        Self::ensure_tables(conn)?;

        let current = Self::get_current_version(conn)?;
        if current > latest {
            return Err(Error::UnsupportedVersion { found: current, latest });
        }

        debug!("Current schema version: {}, target: {}", current, target);

        if current >= target {
            trace!("Schema is up to date, no migration needed");
            return Ok(MigrationReport { from: current, to: current, records_patched: 0 });
        }

        info!("Migrating schema from version {} to {}", current, target);

        let mut records_patched = 0;
        for step in registry.pending(current).take_while(|s| s.version <= target) {
            records_patched += Self::apply_step(conn, step)?;
        }

        info!(records_patched, "Schema migration complete");
        Ok(MigrationReport { from: current, to: target, records_patched })
    }

    /// Apply one version inside a single transaction
    fn apply_step(conn: &mut Connection, step: &SchemaVersion) -> Result<usize> {
        debug!("Applying v{} migration", step.version);

        let tx = conn.transaction()?;
        let mut patched = 0;

        for schema in step.collections {
            patched += Self::patch_collection(&tx, step.version, schema)?;
        }

        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", params![step.version])?;
        tx.commit()?;

        trace!("v{} migration applied, {} records patched", step.version, patched);
        Ok(patched)
    }

    fn patch_collection(tx: &Transaction<'_>, version: u32, schema: &CollectionSchema) -> Result<usize> {
        let collection = schema.collection;
        let table = table_name(collection);

        let rows: Vec<(RecordId, String)> = {
            let mut stmt = tx.prepare(&format!("SELECT id, doc FROM {table} ORDER BY id"))?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        index::clear_collection(tx, collection)?;

        let mut update = tx.prepare(&format!("UPDATE {table} SET doc = ?1 WHERE id = ?2"))?;
        let mut patched = 0;

        for (id, raw) in rows {
            let doc: Document = match serde_json::from_str(&raw) {
                Ok(Value::Object(doc)) => doc,
                Ok(other) => {
                    return Err(Error::migration_failed(
                        version,
                        collection,
                        format!("record {id} is not an object: {other}"),
                    ));
                }
                Err(e) => {
                    return Err(Error::migration_failed(version, collection, format!("record {id}: {e}")));
                }
            };

            let upgraded = (schema.patch)(doc.clone())
                .map_err(|e| Error::migration_failed(version, collection, format!("record {id}: {e}")))?;

            if upgraded != doc {
                update.execute(params![serde_json::to_string(&upgraded)?, id])?;
                patched += 1;
            }

            index::insert_entries(tx, collection, id, &upgraded, schema)?;
        }

        debug!(%collection, version, patched, "Collection patched");
        Ok(patched)
    }
}
