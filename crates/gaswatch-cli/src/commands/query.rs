//! Query command - Read a collection or a document once
//!
//! Provides the `gaswatch query` CLI command which:
//! 1. Resolves the query flags into a descriptor
//! 2. Performs a single fetch through the FetchExecutor
//! 3. Prints the rows, or the classified error if the read fails

use anyhow::Result;
use clap::Args;
use tracing::info;

use gaswatch_core::domain::{row_id, QueryData, QueryDescriptor};
use gaswatch_sync::{ErrorClassifier, FaultBus, FetchExecutor};

use super::{CommandContext, QueryArgs};
use crate::output::OutputFormatter;

#[derive(Debug, Args)]
pub struct QueryCommand {
    #[command(flatten)]
    pub query: QueryArgs,
}

impl QueryCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let descriptor = self.query.descriptor()?;
        let (_pool, service) = ctx.open_backend().await?;

        info!(source = descriptor.source(), "Running one-shot query");

        let fetcher = FetchExecutor::new(service).with_timeout(ctx.config.sync.fetch_timeout());
        match fetcher.execute(&descriptor).await {
            Ok(outcome) => {
                let data = outcome.into_data();
                print_data(formatter.as_ref(), &descriptor, data.as_ref(), ctx.format.is_json());
                Ok(())
            }
            Err(err) => {
                let classified =
                    ErrorClassifier::new(FaultBus::global().clone()).classify(&err, Some(&descriptor));
                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": false,
                        "error": classified,
                    }));
                } else {
                    formatter.error(&classified.to_string());
                }
                Ok(())
            }
        }
    }
}

/// Prints a fetch result in either format
pub fn print_data(
    formatter: &dyn OutputFormatter,
    descriptor: &QueryDescriptor,
    data: Option<&QueryData>,
    json: bool,
) {
    if json {
        formatter.print_json(&serde_json::json!({
            "query": descriptor.identity_key().map(|k| k.to_string()),
            "data": data,
        }));
        return;
    }

    match data {
        None => formatter.info("(no record)"),
        Some(QueryData::Document(row)) => {
            formatter.success(&format!(
                "{} {}",
                descriptor.source(),
                row_id(row).unwrap_or("?")
            ));
            formatter.record(&serde_json::Value::Object(row.clone()));
        }
        Some(QueryData::Rows(rows)) => {
            formatter.success(&format!(
                "{} row{} from {}",
                rows.len(),
                if rows.len() == 1 { "" } else { "s" },
                descriptor.source()
            ));
            for row in rows {
                formatter.record(&serde_json::Value::Object(row.clone()));
            }
        }
    }
}
