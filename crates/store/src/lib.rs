//! Versioned, indexed record store for the vault, backed by SQLite
//!
//! Notes, files and folders are kept as JSON documents with secondary
//! indexes on the attributes the [`SchemaRegistry`] declares. Opening a store
//! brings older data up to the latest schema version one step at a time.
//!
//! # Example
//!
//! ```ignore
//! use vault_core::{NewNote, Note};
//! use vault_store::{SearchFilters, VaultStore};
//!
//! let store = VaultStore::open(&db_path).await?;
//!
//! let id = store
//!     .add::<Note>(NewNote::new("Shopping", "ciphertext").with_tags(["home"]).with_owner("u1"))
//!     .await?;
//!
//! let hits: Vec<Note> = store.search(Some("u1"), &SearchFilters::tags(["home"])).await?;
//! assert_eq!(hits[0].id, id);
//!
//! let tags = store.all_tags(Some("u1")).await?;
//! ```

mod error;
mod index;
mod migration;
mod query;
mod registry;
mod schema;
mod store;

pub use error::{Error, Result};
pub use migration::{MigrationManager, MigrationReport};
pub use query::{CONTENT_COLLECTIONS, SearchFilters};
pub use registry::{
    CollectionSchema, Document, PatchError, PatchFn, SCHEMA_VERSION, SchemaRegistry, SchemaVersion, default_field,
    no_defaults,
};
pub use store::VaultStore;
