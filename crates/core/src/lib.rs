pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use config::{Config, ConfigError, FileLoggingConfig, LoggingSection, StoreConfig};
pub use error::{Error, Result};
pub use models::{Collection, Entity, File, FilePatch, Folder, FolderPatch, NewFile, NewFolder, NewNote, Note, NotePatch, RecordId};
