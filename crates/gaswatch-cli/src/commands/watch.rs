//! Watch command - Keep a query live and print its states
//!
//! Provides the `gaswatch watch` CLI command which:
//! 1. Starts a LiveQuery for the descriptor given by the query flags
//! 2. Prints every state the query publishes (loading, ready, failed)
//! 3. Reports permission faults from the global fault bus as warnings
//! 4. Stops on Ctrl+C, or after `--count` settled states

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tracing::info;

use gaswatch_core::domain::{ErrorKind, Phase, SyncState};
use gaswatch_sync::{FaultBus, LiveQuery};

use super::query::print_data;
use super::{CommandContext, QueryArgs};
use crate::output::OutputFormatter;

#[derive(Debug, Args)]
pub struct WatchCommand {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Exit after this many settled (ready or failed) states
    #[arg(long)]
    pub count: Option<usize>,
}

impl WatchCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let descriptor = self.query.descriptor()?;
        let (_pool, service) = ctx.open_backend().await?;

        let use_json = ctx.format.is_json();
        let _faults = FaultBus::global().on(ErrorKind::PermissionDenied, move |fault| {
            let fault_formatter = crate::output::get_formatter(use_json);
            fault_formatter.warn(&format!("Access denied to {}", fault.resource_path));
        });

        let live = LiveQuery::from_config(service.clone(), service, &ctx.config.sync);
        let mut states = live.observe(Some(descriptor.clone()));

        info!(identity = ?live.identity(), "Watching query");
        if !use_json {
            formatter.info("Watching. Press Ctrl+C to stop.");
        }

        let mut settled = 0usize;
        loop {
            let state = states.borrow_and_update().clone();
            if print_state(formatter.as_ref(), &descriptor, &state, use_json) {
                settled += 1;
            }
            if self.count.is_some_and(|limit| settled >= limit) {
                break;
            }

            tokio::select! {
                changed = states.changed() => {
                    changed.context("Live query stopped unexpectedly")?;
                }
                interrupted = signal::ctrl_c() => {
                    interrupted.context("Failed to listen for Ctrl+C signal")?;
                    formatter.info("Received Ctrl+C, stopping...");
                    break;
                }
            }
        }

        live.clear();
        Ok(())
    }
}

/// Prints one state; returns true if it was settled
fn print_state(
    formatter: &dyn OutputFormatter,
    descriptor: &gaswatch_core::domain::QueryDescriptor,
    state: &SyncState,
    json: bool,
) -> bool {
    let phase = state.phase();
    if json {
        formatter.print_json_line(&serde_json::json!({
            "phase": format!("{phase:?}").to_lowercase(),
            "state": state,
        }));
    } else {
        match phase {
            Phase::Idle => {}
            Phase::Loading if state.data.is_some() => formatter.info("Refreshing..."),
            Phase::Loading => formatter.info("Loading..."),
            Phase::Ready => print_data(formatter, descriptor, state.data.as_ref(), false),
            Phase::Failed => {
                if let Some(error) = &state.error {
                    formatter.error(&error.to_string());
                }
            }
        }
    }
    matches!(phase, Phase::Ready | Phase::Failed)
}
