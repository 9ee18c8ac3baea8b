//! Error types for the vault store

use thiserror::Error;
use vault_core::{Collection, RecordId};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the vault store
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record is missing a required field or is not an object
    #[error("Invalid record for {collection}: {reason}")]
    InvalidRecord { collection: Collection, reason: String },

    /// Update/delete against an unknown identity
    #[error("Record not found: collection={collection}, id={id}")]
    NotFound { collection: Collection, id: RecordId },

    /// A version's patch step failed while opening the store
    #[error("Migration to version {version} failed in {collection}: {reason}")]
    MigrationFailed { version: u32, collection: Collection, reason: String },

    /// Store was written by a newer schema than this build knows
    #[error("Store is at schema version {found}, newest supported is {latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    /// Registry declaration is malformed
    #[error("Invalid schema registry: {0}")]
    InvalidRegistry(String),

    /// Database corruption or schema mismatch
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    ConnectionError(#[from] tokio_rusqlite::Error),
}

impl Error {
    /// Create a database error with a message
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(collection: Collection, reason: impl Into<String>) -> Self {
        Self::InvalidRecord { collection, reason: reason.into() }
    }

    /// Create a not found error
    pub fn not_found(collection: Collection, id: RecordId) -> Self {
        Self::NotFound { collection, id }
    }

    /// Create a migration failure
    pub fn migration_failed(version: u32, collection: Collection, reason: impl Into<String>) -> Self {
        Self::MigrationFailed { version, collection, reason: reason.into() }
    }

    /// Whether this is a `NotFound` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found(Collection::Notes, 42);
        assert_eq!(err.to_string(), "Record not found: collection=notes, id=42");
        assert!(err.is_not_found());

        let err = Error::invalid_record(Collection::Files, "missing field 'name'");
        assert!(err.to_string().contains("files"));
        assert!(err.to_string().contains("missing field 'name'"));
    }

    #[test]
    fn test_migration_failed_carries_version_and_collection() {
        let err = Error::migration_failed(3, Collection::Notes, "boom");
        assert!(matches!(
            err,
            Error::MigrationFailed { version: 3, collection: Collection::Notes, .. }
        ));
        assert_eq!(err.to_string(), "Migration to version 3 failed in notes: boom");
    }

    #[test]
    fn test_error_from_sqlite() {
        let sqlite_err = rusqlite::Error::InvalidPath("test path".into());
        let err: Error = sqlite_err.into();
        assert!(matches!(err, Error::Sqlite(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let err = Error::UnsupportedVersion { found: 9, latest: 3 };
        assert!(err.to_string().contains("version 9"));
        assert!(!err.is_not_found());
    }
}
