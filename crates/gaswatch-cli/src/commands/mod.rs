//! CLI subcommands and the state they share

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use gaswatch_cache::{DatabasePool, SqliteDataService};
use gaswatch_core::config::Config;
use gaswatch_core::domain::{QueryDescriptor, QuerySpec, Scalar, SpecKind};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

pub mod config;
pub mod query;
pub mod records;
pub mod watch;

/// Everything a command needs besides its own arguments
#[derive(Debug)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub config_path: PathBuf,
    pub config: Config,
}

impl CommandContext {
    pub fn new(format: OutputFormat, config_path: PathBuf, config: Config) -> Self {
        Self {
            format,
            config_path,
            config,
        }
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format.is_json())
    }

    /// Opens the configured database
    ///
    /// The pool is returned alongside the service so it outlives every
    /// clone of the service.
    pub async fn open_backend(&self) -> Result<(DatabasePool, Arc<SqliteDataService>)> {
        let database = &self.config.backend.database;
        let pool = DatabasePool::from_config(&self.config.backend)
            .await
            .with_context(|| format!("Failed to open database {}", database.display()))?;
        let service = SqliteDataService::from_config(pool.pool().clone(), &self.config);

        debug!(location = ?pool.location(), "Backend opened");
        Ok((pool, Arc::new(service)))
    }
}

// ============================================================================
// Shared query arguments
// ============================================================================

/// Flags describing a query descriptor
#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Table or collection to read (e.g. "devices")
    #[arg(long)]
    pub source: String,

    /// Read a single record by id instead of a collection
    #[arg(long)]
    pub id: Option<String>,

    /// Equality filter as field=value (repeatable)
    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    pub filters: Vec<String>,

    /// Ordering as field, field:asc or field:desc (default created_at:desc)
    #[arg(long)]
    pub order: Option<String>,

    /// Maximum number of rows
    #[arg(long)]
    pub limit: Option<i64>,

    /// Poll every N milliseconds instead of subscribing to changes
    ///
    /// Change subscriptions only see writes made by this process.
    #[arg(long = "poll-ms")]
    pub poll_ms: Option<u64>,
}

impl QueryArgs {
    /// Converts the flags into a query spec
    pub fn to_spec(&self) -> Result<QuerySpec> {
        let mut spec = QuerySpec {
            kind: if self.id.is_some() {
                SpecKind::Document
            } else {
                SpecKind::Collection
            },
            source: Some(self.source.clone()),
            id: self.id.clone(),
            order_by: self.order.clone(),
            limit: self.limit,
            poll_interval_ms: self.poll_ms,
            ..QuerySpec::default()
        };

        for raw in &self.filters {
            let (field, value) = parse_filter(raw)?;
            spec.filters.insert(field, value);
        }

        if self.id.is_some()
            && (!self.filters.is_empty()
                || self.order.is_some()
                || self.limit.is_some()
                || self.poll_ms.is_some())
        {
            anyhow::bail!("--filter, --order, --limit and --poll-ms apply to collections only");
        }

        Ok(spec)
    }

    /// Resolves the flags into a complete descriptor
    pub fn descriptor(&self) -> Result<QueryDescriptor> {
        self.to_spec()?
            .resolve()
            .context("Invalid query")?
            .context("Query is incomplete: --source and, for documents, --id are required")
    }
}

/// Parses a `field=value` filter flag
fn parse_filter(raw: &str) -> Result<(String, Scalar)> {
    let (field, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid filter '{raw}': expected field=value"))?;
    let field = field.trim();
    if field.is_empty() {
        anyhow::bail!("Invalid filter '{raw}': field is empty");
    }
    Ok((field.to_string(), Scalar::parse(value)))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::time::Duration;

    use gaswatch_core::domain::{CollectionQuery, DocumentQuery, OrderBy};

    use super::*;

    fn args(source: &str) -> QueryArgs {
        QueryArgs {
            source: source.to_string(),
            id: None,
            filters: Vec::new(),
            order: None,
            limit: None,
            poll_ms: None,
        }
    }

    #[test]
    fn test_collection_descriptor_from_flags() {
        let mut a = args("devices");
        a.filters = vec!["user_id=u1".into(), "online=true".into(), "ppm=40".into()];
        a.order = Some("ppm:asc".into());
        a.limit = Some(10);

        let expected: QueryDescriptor = CollectionQuery::new("devices")
            .filter("user_id", "u1")
            .filter("online", true)
            .filter("ppm", 40i64)
            .order_by(OrderBy::new("ppm").ascending())
            .limit(NonZeroU32::new(10).unwrap())
            .into();
        assert_eq!(a.descriptor().unwrap().identity_key(), expected.identity_key());
    }

    #[test]
    fn test_poll_flag_selects_polling() {
        let mut a = args("readings");
        a.poll_ms = Some(250);

        let expected: QueryDescriptor = CollectionQuery::new("readings")
            .poll_every(Duration::from_millis(250))
            .into();
        assert_eq!(a.descriptor().unwrap(), expected);
    }

    #[test]
    fn test_document_descriptor_from_flags() {
        let mut a = args("devices");
        a.id = Some("d1".into());

        let expected: QueryDescriptor = DocumentQuery::new("devices", "d1").into();
        assert_eq!(a.descriptor().unwrap(), expected);

        a.limit = Some(1);
        assert!(a.descriptor().is_err());
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        let mut a = args("devices");
        a.filters = vec!["no-equals-sign".into()];
        assert!(a.descriptor().is_err());

        let mut a = args("devices");
        a.limit = Some(0);
        assert!(a.descriptor().is_err());

        let a = args("bad source");
        assert!(a.descriptor().is_err());

        let a = args("");
        assert!(a.descriptor().is_err());
    }

    #[test]
    fn test_filter_values_are_typed() {
        assert_eq!(
            parse_filter("ppm=12.5").unwrap(),
            ("ppm".to_string(), Scalar::Float(12.5))
        );
        assert_eq!(
            parse_filter("serial=\"007\"").unwrap(),
            ("serial".to_string(), Scalar::Text("007".into()))
        );
        assert_eq!(
            parse_filter("note=a=b").unwrap(),
            ("note".to_string(), Scalar::Text("a=b".into()))
        );
    }
}
