//! Configuration module for GasWatch.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::query::is_identifier;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for GasWatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

/// Live-query settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Schema that collection change subscriptions are scoped to.
    pub schema: String,
    /// Milliseconds before a fetch is abandoned as transient. `0` disables the timeout.
    pub fetch_timeout_ms: u64,
    /// Capacity of the backend's change broadcast channel.
    pub change_buffer: usize,
}

/// Backend (local SQLite record store) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Path to the SQLite database file.
    pub database: PathBuf,
    /// Sources readable through the backend. `None` allows every source.
    pub allowed_sources: Option<Vec<String>>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/gaswatch/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("gaswatch")
            .join("config.yaml")
    }
}

impl SyncConfig {
    /// Fetch timeout as a duration, `None` when disabled.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            fetch_timeout_ms: 10_000,
            change_buffer: 256,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("gaswatch");
        Self {
            database: data_dir.join("gaswatch.db"),
            allowed_sources: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.change_buffer"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if !is_identifier(&self.sync.schema) {
            errors.push(ValidationError {
                field: "sync.schema".into(),
                message: format!("not a valid identifier: '{}'", self.sync.schema),
            });
        }
        if self.sync.change_buffer == 0 {
            errors.push(ValidationError {
                field: "sync.change_buffer".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- backend ---
        if self.backend.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "backend.database".into(),
                message: "must not be empty".into(),
            });
        }
        if let Some(sources) = &self.backend.allowed_sources {
            for source in sources.iter().filter(|s| !is_identifier(s)) {
                errors.push(ValidationError {
                    field: "backend.allowed_sources".into(),
                    message: format!("not a valid identifier: '{source}'"),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use gaswatch_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_schema("telemetry")
///     .sync_fetch_timeout_ms(2_000)
///     .logging_level("debug")
///     .build();
/// assert!(config.validate().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_schema(mut self, schema: impl Into<String>) -> Self {
        self.config.sync.schema = schema.into();
        self
    }

    pub fn sync_fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.sync.fetch_timeout_ms = ms;
        self
    }

    pub fn sync_change_buffer(mut self, capacity: usize) -> Self {
        self.config.sync.change_buffer = capacity;
        self
    }

    // --- backend ---

    pub fn backend_database(mut self, path: PathBuf) -> Self {
        self.config.backend.database = path;
        self
    }

    pub fn backend_allowed_sources(mut self, sources: Vec<String>) -> Self {
        self.config.backend.allowed_sources = Some(sources);
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    /// Consume the builder and return the final [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.sync.schema, "public");
        assert_eq!(
            config.sync.fetch_timeout(),
            Some(Duration::from_millis(10_000))
        );
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = ConfigBuilder::new().sync_fetch_timeout_ms(0).build();
        assert_eq!(config.sync.fetch_timeout(), None);
    }

    #[test]
    fn test_load_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "sync:\n  schema: telemetry\nbackend:\n  allowed_sources: [devices, alerts]\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sync.schema, "telemetry");
        assert_eq!(config.sync.change_buffer, 256);
        assert_eq!(
            config.backend.allowed_sources,
            Some(vec!["devices".to_string(), "alerts".to_string()])
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/gaswatch.yaml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = ConfigBuilder::new()
            .sync_schema("not valid")
            .sync_change_buffer(0)
            .backend_allowed_sources(vec!["devices".into(), "bad-name".into()])
            .logging_level("loud")
            .logging_format("xml")
            .build();

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "sync.schema",
                "sync.change_buffer",
                "backend.allowed_sources",
                "logging.level",
                "logging.format",
            ]
        );
    }

    #[test]
    fn test_yaml_roundtrip_keeps_values() {
        let config = ConfigBuilder::new()
            .backend_database(PathBuf::from("/tmp/gaswatch.db"))
            .logging_format("json")
            .build();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
