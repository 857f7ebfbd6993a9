//! Config command - View and manage GasWatch configuration
//!
//! Provides the `gaswatch config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use gaswatch_core::config::Config;

use super::CommandContext;

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.fetch_timeout_ms")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config_path = &ctx.config_path;

        info!(config_path = %config_path.display(), "Showing configuration");

        if ctx.format.is_json() {
            let json = serde_json::to_value(&ctx.config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", config_path.display()));
            formatter.info("");

            let yaml = serde_yaml::to_string(&ctx.config)
                .context("Failed to serialize configuration to YAML")?;

            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    /// Set a configuration value using dot-notation
    fn execute_set(&self, ctx: &CommandContext, key: &str, value: &str) -> Result<()> {
        let formatter = ctx.formatter();
        let config_path = &ctx.config_path;
        let mut config = ctx.config.clone();

        info!(key = %key, value = %value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "error": e.to_string(),
                }));
            } else {
                formatter.error(&e.to_string());
            }
            return Ok(());
        }

        let errors = config.validate();
        if !errors.is_empty() {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "errors": error_msgs,
                }));
            } else {
                formatter.error(&format!(
                    "Invalid value for '{}': {}",
                    key,
                    error_msgs.join("; ")
                ));
            }
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
        std::fs::write(config_path, &yaml).context("Failed to write configuration file")?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {} = {}", key, value));
            formatter.info(&format!("Saved to {}", config_path.display()));
        }

        Ok(())
    }

    /// Validate configuration file
    fn execute_validate(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config_path = &ctx.config_path;

        // Load the file explicitly; the context holds defaults when it is missing.
        let config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                let message = if config_path.exists() {
                    format!("Failed to parse configuration: {e:#}")
                } else {
                    "Configuration file not found. Using defaults.".to_string()
                };

                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [message],
                    }));
                } else if config_path.exists() {
                    formatter.error(&message);
                    formatter.info(&format!("File: {}", config_path.display()));
                } else {
                    formatter.info(&format!(
                        "Configuration file not found at {}",
                        config_path.display()
                    ));
                    formatter.info("Using default configuration. Run 'gaswatch config set <key> <value>' to create one.");
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");

        let errors = config.validate();

        if ctx.format.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}

/// Apply a dot-notation key/value pair to a Config struct
///
/// Supported keys:
/// - sync.schema, sync.fetch_timeout_ms, sync.change_buffer
/// - backend.database, backend.allowed_sources (comma-separated, or "none")
/// - logging.level, logging.format
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- sync ---
        "sync.schema" => {
            config.sync.schema = value.to_string();
        }
        "sync.fetch_timeout_ms" => {
            config.sync.fetch_timeout_ms = value
                .parse::<u64>()
                .context("Expected a non-negative integer for sync.fetch_timeout_ms")?;
        }
        "sync.change_buffer" => {
            config.sync.change_buffer = value
                .parse::<usize>()
                .context("Expected a positive integer for sync.change_buffer")?;
        }

        // --- backend ---
        "backend.database" => {
            config.backend.database = PathBuf::from(value);
        }
        "backend.allowed_sources" => {
            config.backend.allowed_sources = if value.is_empty() || value == "none" {
                None
            } else {
                Some(
                    value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                )
            };
        }

        // --- logging ---
        "logging.level" => {
            config.logging.level = value.to_string();
        }
        "logging.format" => {
            config.logging.format = value.to_string();
        }

        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;

    #[test]
    fn test_apply_sync_schema() {
        let mut config = Config::default();
        apply_config_value(&mut config, "sync.schema", "telemetry").unwrap();
        assert_eq!(config.sync.schema, "telemetry");
    }

    #[test]
    fn test_apply_sync_fetch_timeout() {
        let mut config = Config::default();
        apply_config_value(&mut config, "sync.fetch_timeout_ms", "0").unwrap();
        assert_eq!(config.sync.fetch_timeout(), None);
    }

    #[test]
    fn test_apply_sync_change_buffer() {
        let mut config = Config::default();
        apply_config_value(&mut config, "sync.change_buffer", "1024").unwrap();
        assert_eq!(config.sync.change_buffer, 1024);
    }

    #[test]
    fn test_apply_backend_database() {
        let mut config = Config::default();
        apply_config_value(&mut config, "backend.database", "/var/lib/gaswatch.db").unwrap();
        assert_eq!(config.backend.database, PathBuf::from("/var/lib/gaswatch.db"));
    }

    #[test]
    fn test_apply_backend_allowed_sources() {
        let mut config = Config::default();
        apply_config_value(&mut config, "backend.allowed_sources", "devices, alerts").unwrap();
        assert_eq!(
            config.backend.allowed_sources,
            Some(vec!["devices".to_string(), "alerts".to_string()])
        );

        apply_config_value(&mut config, "backend.allowed_sources", "none").unwrap();
        assert_eq!(config.backend.allowed_sources, None);
    }

    #[test]
    fn test_apply_logging() {
        let mut config = Config::default();
        apply_config_value(&mut config, "logging.level", "debug").unwrap();
        apply_config_value(&mut config, "logging.format", "json").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_apply_invalid_values() {
        let mut config = Config::default();
        assert!(apply_config_value(&mut config, "sync.change_buffer", "lots").is_err());
        assert!(apply_config_value(&mut config, "sync.fetch_timeout_ms", "-1").is_err());
        assert!(apply_config_value(&mut config, "unknown.key", "value").is_err());
    }

    #[tokio::test]
    async fn test_set_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gaswatch").join("config.yaml");
        let ctx = CommandContext::new(OutputFormat::Json, path.clone(), Config::default());

        ConfigCommand::Set {
            key: "sync.schema".into(),
            value: "telemetry".into(),
        }
        .execute(&ctx)
        .await
        .unwrap();

        let saved = Config::load(&path).unwrap();
        assert_eq!(saved.sync.schema, "telemetry");
    }

    #[tokio::test]
    async fn test_set_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let ctx = CommandContext::new(OutputFormat::Json, path.clone(), Config::default());

        ConfigCommand::Set {
            key: "sync.change_buffer".into(),
            value: "0".into(),
        }
        .execute(&ctx)
        .await
        .unwrap();

        assert!(!path.exists());
    }
}
