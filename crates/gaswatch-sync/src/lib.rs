//! GasWatch Sync - Live-query synchronization engine
//!
//! Provides:
//! - One-shot reads through the data-service port
//! - Push-based refresh through the change-feed port
//! - Timer-driven refresh as the alternative to push
//! - Error classification and a process-wide fault bus
//!
//! ## Modules
//!
//! - [`engine`] - [`LiveQuery`](engine::LiveQuery), the per-descriptor state machine
//! - [`fetch`] - [`FetchExecutor`](fetch::FetchExecutor), point-in-time reads with timeout
//! - [`notifier`] - [`ChangeNotifier`](notifier::ChangeNotifier), scoped change subscriptions
//! - [`poller`] - [`PollIntervalDriver`](poller::PollIntervalDriver), fixed-interval refresh
//! - [`classifier`] - [`ErrorClassifier`](classifier::ErrorClassifier)
//! - [`fault_bus`] - [`FaultBus`](fault_bus::FaultBus), publish/subscribe for faults

pub mod classifier;
pub mod engine;
pub mod fault_bus;
pub mod fetch;
pub mod notifier;
pub mod poller;

use std::time::Duration;

use thiserror::Error;

pub use classifier::ErrorClassifier;
pub use engine::LiveQuery;
pub use fault_bus::{FaultBus, FaultSubscription};
pub use fetch::FetchExecutor;

/// Errors raised inside the sync layer itself
///
/// These never reach consumers directly: the engine classifies them into
/// the state's error slot like any backend failure.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A fetch did not complete within the configured timeout
    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),
}
