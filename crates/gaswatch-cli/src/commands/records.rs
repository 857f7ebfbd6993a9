//! Record commands - Insert, update and delete records
//!
//! Writes go through the SQLite record store, which publishes a change
//! event for each one.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use tracing::info;

use gaswatch_core::domain::query::is_identifier;
use gaswatch_core::domain::row_id;

use super::CommandContext;

/// Parses a JSON object argument
fn parse_body(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("Body is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("Body must be a JSON object, e.g. '{{\"status\": \"ok\"}}'");
    }
    Ok(value)
}

fn check_source(source: &str) -> Result<()> {
    if !is_identifier(source) {
        anyhow::bail!("Invalid source name: '{source}'");
    }
    Ok(())
}

// ============================================================================
// InsertCommand
// ============================================================================

#[derive(Debug, Args)]
pub struct InsertCommand {
    /// Target source (e.g. "readings")
    #[arg(long)]
    pub source: String,

    /// Record as a JSON object; an "id" is generated when missing
    pub body: String,
}

impl InsertCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        check_source(&self.source)?;
        let body = parse_body(&self.body)?;
        let (_pool, service) = ctx.open_backend().await?;

        let row = service
            .insert(&self.source, body)
            .await
            .with_context(|| format!("Failed to insert into '{}'", self.source))?;
        let id = row_id(&row).unwrap_or_default().to_string();

        info!(source = %self.source, id = %id, "Record inserted");

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "source": self.source,
                "record": row,
            }));
        } else {
            formatter.success(&format!("Inserted {}/{}", self.source, id));
        }
        Ok(())
    }
}

// ============================================================================
// UpdateCommand
// ============================================================================

#[derive(Debug, Args)]
pub struct UpdateCommand {
    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub id: String,

    /// Fields to merge, as a JSON object
    pub patch: String,
}

impl UpdateCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        check_source(&self.source)?;
        let patch = parse_body(&self.patch)?;
        let (_pool, service) = ctx.open_backend().await?;

        let updated = service
            .update(&self.source, &self.id, patch)
            .await
            .with_context(|| format!("Failed to update '{}/{}'", self.source, self.id))?;

        match (updated, ctx.format.is_json()) {
            (Some(row), true) => formatter.print_json(&serde_json::json!({
                "success": true,
                "source": self.source,
                "record": row,
            })),
            (Some(_), false) => {
                formatter.success(&format!("Updated {}/{}", self.source, self.id))
            }
            (None, _) => formatter.error(&format!("No record {}/{}", self.source, self.id)),
        }
        Ok(())
    }
}

// ============================================================================
// DeleteCommand
// ============================================================================

#[derive(Debug, Args)]
pub struct DeleteCommand {
    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub id: String,
}

impl DeleteCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        check_source(&self.source)?;
        let (_pool, service) = ctx.open_backend().await?;

        let deleted = service
            .delete(&self.source, &self.id)
            .await
            .with_context(|| format!("Failed to delete '{}/{}'", self.source, self.id))?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": deleted,
                "source": self.source,
                "id": self.id,
            }));
        } else if deleted {
            formatter.success(&format!("Deleted {}/{}", self.source, self.id));
        } else {
            formatter.warn(&format!("No record {}/{}", self.source, self.id));
        }
        Ok(())
    }
}
