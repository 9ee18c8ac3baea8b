use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Store location and behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file; relative paths resolve against the config file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("vault.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// `[logging.file]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_file_log_level")]
    pub level: String,
    /// Log directory; defaults to `~/.vault/logs`
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_file_log_level() -> String {
    "debug".to_string()
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: default_file_log_level(), dir: None }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: FileLoggingConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), file: FileLoggingConfig::default() }
    }
}

/// Top-level configuration loaded from `vault.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// A relative store path is rebased onto the directory holding the file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if config.store.path.is_relative()
            && let Some(parent) = path.parent()
        {
            config.store.path = parent.join(&config.store.path);
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::EmptyStorePath.to_string()));
        }

        if crate::logging::LogFormat::parse_str(&self.logging.format).is_none() {
            return Err(Error::Config(
                ConfigError::InvalidLogFormat(self.logging.format.clone()).to_string(),
            ));
        }

        Ok(())
    }

    /// Example configuration written by `vault init`
    pub fn example() -> &'static str {
        r#"# Vault configuration

[store]
# SQLite database file, relative to this file
path = "vault.db"

[logging]
# Filter directive, overridden by VAULT_LOG or RUST_LOG
level = "warn"
# pretty | json | compact
format = "pretty"

[logging.file]
enabled = false
level = "debug"
"#
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("store.path must not be empty")]
    EmptyStorePath,

    #[error("invalid log format '{0}', expected pretty, json or compact")]
    InvalidLogFormat(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.store.path, PathBuf::from("vault.db"));
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "pretty");
        assert!(!config.logging.file.enabled);
    }

    #[test]
    fn test_config_from_toml_str() {
        let toml = r#"
[store]
path = "/var/lib/vault/data.db"

[logging]
level = "debug"
format = "json"

[logging.file]
enabled = true
level = "trace"
dir = "/tmp/vault-logs"
"#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/vault/data.db"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert!(config.logging.file.enabled);
        assert_eq!(config.logging.file.level, "trace");
        assert_eq!(config.logging.file.dir, Some(PathBuf::from("/tmp/vault-logs")));
    }

    #[test]
    fn test_config_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_example_parses() {
        let config = Config::from_toml_str(Config::example()).unwrap();
        assert_eq!(config.store.path, PathBuf::from("vault.db"));
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let toml = r#"
[store]
path = "vault.db"
encryption = "aes"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_config_rejects_empty_store_path() {
        let toml = r#"
[store]
path = ""
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("store.path"));
    }

    #[test]
    fn test_config_rejects_unknown_log_format() {
        let toml = r#"
[logging]
format = "xml"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("invalid log format 'xml'"));
    }

    #[test]
    fn test_config_from_file_rebases_relative_store_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("vault.toml");
        std::fs::write(&config_path, Config::example()).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.store.path, temp_dir.path().join("vault.db"));
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/vault.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }
}
