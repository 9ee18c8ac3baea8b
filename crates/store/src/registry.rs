//! Schema registry: the declared history of record shapes
//!
//! Each [`SchemaVersion`] lists the collections whose shape changed at that
//! version, with the attributes to index, the fields required on insert and a
//! pure default patch that upgrades a record written under the previous
//! version. A collection not mentioned in a version keeps its previous
//! declaration.
//!
//! The registry is a static declaration. Nothing mutates it at runtime; the
//! migration engine and the store only read it.

use crate::error::{Error, Result};

use serde_json::{Map, Value, json};
use vault_core::Collection;

/// A stored record as a JSON object (identity is kept outside the document)
pub type Document = Map<String, Value>;

/// Default patch for one collection at one version
///
/// Must be idempotent: fields are only filled when entirely absent.
pub type PatchFn = fn(Document) -> std::result::Result<Document, PatchError>;

/// Error raised by a patch function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PatchError(pub String);

impl PatchError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Shape of one collection as of a schema version
#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
    pub collection: Collection,
    /// Attributes with a secondary index; array attributes are multi-entry
    pub indexed: &'static [&'static str],
    /// Fields that must be present and non-null on insert
    pub required: &'static [&'static str],
    pub patch: PatchFn,
}

impl CollectionSchema {
    pub fn is_indexed(&self, attribute: &str) -> bool {
        self.indexed.contains(&attribute)
    }
}

/// One step in the schema history
#[derive(Debug, Clone, Copy)]
pub struct SchemaVersion {
    pub version: u32,
    pub collections: &'static [CollectionSchema],
}

impl SchemaVersion {
    pub fn schema_for(&self, collection: Collection) -> Option<&'static CollectionSchema> {
        self.collections.iter().find(|c| c.collection == collection)
    }
}

/// Ordered, immutable list of schema versions
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
    versions: &'static [SchemaVersion],
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    pub const fn new(versions: &'static [SchemaVersion]) -> Self {
        Self { versions }
    }

    /// The schema history shipped with this build
    pub const fn builtin() -> Self {
        Self::new(BUILTIN_VERSIONS)
    }

    pub fn versions(&self) -> &'static [SchemaVersion] {
        self.versions
    }

    pub fn latest_version(&self) -> u32 {
        self.versions.last().map(|v| v.version).unwrap_or(0)
    }

    /// Versions strictly newer than `current`, ascending
    pub fn pending(&self, current: u32) -> impl Iterator<Item = &'static SchemaVersion> {
        self.versions.iter().filter(move |v| v.version > current)
    }

    /// Declaration in effect for `collection` at `version`
    pub fn schema_at(&self, version: u32, collection: Collection) -> Option<&'static CollectionSchema> {
        self.versions
            .iter()
            .take_while(|v| v.version <= version)
            .filter_map(|v| v.schema_for(collection))
            .last()
    }

    /// Declaration in effect for `collection` at the latest version
    pub fn current(&self, collection: Collection) -> Option<&'static CollectionSchema> {
        self.schema_at(self.latest_version(), collection)
    }

    /// Check that versions start at 1, increase by one and name each collection once
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(Error::InvalidRegistry("no versions declared".to_string()));
        }

        for (idx, step) in self.versions.iter().enumerate() {
            let expected = idx as u32 + 1;
            if step.version != expected {
                return Err(Error::InvalidRegistry(format!(
                    "expected version {} at position {}, found {}",
                    expected, idx, step.version
                )));
            }

            for (i, schema) in step.collections.iter().enumerate() {
                if step.collections[..i].iter().any(|c| c.collection == schema.collection) {
                    return Err(Error::InvalidRegistry(format!(
                        "{} declared twice in version {}",
                        schema.collection, step.version
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Insert `value` under `field` only when the field is entirely absent
///
/// A present value is kept even when falsy (`0`, `false`, `""`).
pub fn default_field(doc: &mut Document, field: &str, value: Value) {
    if !doc.contains_key(field) {
        doc.insert(field.to_string(), value);
    }
}

/// Patch that changes nothing; used for a collection's first version
pub fn no_defaults(doc: Document) -> std::result::Result<Document, PatchError> {
    Ok(doc)
}

/// Absent or null tags become an empty set; duplicates collapse (first wins)
///
/// Anything but an array of strings is rejected.
fn default_tags(doc: &mut Document) -> std::result::Result<(), PatchError> {
    let tags = match doc.get("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut tags: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !item.is_string() {
                    return Err(PatchError::new(format!("tag {item} is not a string")));
                }
                if !tags.contains(item) {
                    tags.push(item.clone());
                }
            }
            tags
        }
        Some(other) => return Err(PatchError::new(format!("tags must be an array, found {other}"))),
    };
    doc.insert("tags".to_string(), Value::Array(tags));
    Ok(())
}

fn add_tags(mut doc: Document) -> std::result::Result<Document, PatchError> {
    default_tags(&mut doc)?;
    Ok(doc)
}

fn notes_v3(mut doc: Document) -> std::result::Result<Document, PatchError> {
    default_field(&mut doc, "folder_id", Value::Null);
    default_field(&mut doc, "is_private", json!(false));
    Ok(doc)
}

fn files_v3(mut doc: Document) -> std::result::Result<Document, PatchError> {
    default_field(&mut doc, "folder_id", Value::Null);
    Ok(doc)
}

fn folders_v3(mut doc: Document) -> std::result::Result<Document, PatchError> {
    default_tags(&mut doc)?;
    default_field(&mut doc, "is_private", json!(false));
    Ok(doc)
}

const NOTE_REQUIRED: &[&str] = &["title", "content", "encrypted"];
const FILE_REQUIRED: &[&str] = &["name", "mime_type", "size", "data", "encrypted"];
const FOLDER_REQUIRED: &[&str] = &["name", "encrypted"];

const BUILTIN_VERSIONS: &[SchemaVersion] = &[
    SchemaVersion {
        version: 1,
        collections: &[
            CollectionSchema {
                collection: Collection::Notes,
                indexed: &["title", "encrypted", "created_at", "updated_at", "owner_id"],
                required: NOTE_REQUIRED,
                patch: no_defaults,
            },
            CollectionSchema {
                collection: Collection::Files,
                indexed: &["name", "mime_type", "size", "encrypted", "created_at", "updated_at", "owner_id"],
                required: FILE_REQUIRED,
                patch: no_defaults,
            },
        ],
    },
    SchemaVersion {
        version: 2,
        collections: &[
            CollectionSchema {
                collection: Collection::Notes,
                indexed: &["title", "encrypted", "tags", "created_at", "updated_at", "owner_id"],
                required: NOTE_REQUIRED,
                patch: add_tags,
            },
            CollectionSchema {
                collection: Collection::Files,
                indexed: &["name", "mime_type", "size", "encrypted", "tags", "created_at", "updated_at", "owner_id"],
                required: FILE_REQUIRED,
                patch: add_tags,
            },
        ],
    },
    SchemaVersion {
        version: 3,
        collections: &[
            CollectionSchema {
                collection: Collection::Notes,
                indexed: &["title", "encrypted", "tags", "created_at", "updated_at", "owner_id", "folder_id"],
                required: NOTE_REQUIRED,
                patch: notes_v3,
            },
            CollectionSchema {
                collection: Collection::Files,
                indexed: &[
                    "name",
                    "mime_type",
                    "size",
                    "encrypted",
                    "tags",
                    "created_at",
                    "updated_at",
                    "owner_id",
                    "folder_id",
                ],
                required: FILE_REQUIRED,
                patch: files_v3,
            },
            CollectionSchema {
                collection: Collection::Folders,
                indexed: &["name", "encrypted", "tags", "created_at", "updated_at", "owner_id", "parent_id"],
                required: FOLDER_REQUIRED,
                patch: folders_v3,
            },
        ],
    },
];

/// Current schema version of the built-in registry
pub const SCHEMA_VERSION: u32 = 3;
