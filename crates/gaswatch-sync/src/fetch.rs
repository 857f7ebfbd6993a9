//! Point-in-time reads
//!
//! The [`FetchExecutor`] performs one read for a descriptor through the
//! [`IDataService`] port. It adds the configured timeout and logging but
//! no retries: a failed read is returned as-is for the engine to classify.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::debug;

use gaswatch_core::domain::{CollectionQuery, DocumentQuery, FetchOutcome, QueryDescriptor, Row};
use gaswatch_core::ports::IDataService;

use crate::SyncError;

/// Executes reads against the backend
#[derive(Clone)]
pub struct FetchExecutor {
    service: Arc<dyn IDataService>,
    timeout: Option<Duration>,
}

impl FetchExecutor {
    /// Creates an executor without a timeout
    pub fn new(service: Arc<dyn IDataService>) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    /// Abandons reads that take longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the rows of a collection query
    pub async fn fetch_list(&self, query: &CollectionQuery) -> Result<Vec<Row>> {
        let started = Instant::now();
        let rows = self
            .bounded(self.service.fetch_list(query))
            .await
            .with_context(|| format!("Failed to read collection '{}'", query.source()))?;

        debug!(
            source = query.source(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection read complete"
        );
        Ok(rows)
    }

    /// Reads one document; `Ok(None)` when it does not exist
    pub async fn fetch_one(&self, query: &DocumentQuery) -> Result<Option<Row>> {
        let started = Instant::now();
        let row = self
            .bounded(self.service.fetch_one(query))
            .await
            .with_context(|| {
                format!("Failed to read document '{}/{}'", query.source(), query.id())
            })?;

        debug!(
            source = query.source(),
            id = query.id(),
            found = row.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document read complete"
        );
        Ok(row)
    }

    /// Runs the read matching the descriptor's variant
    pub async fn execute(&self, descriptor: &QueryDescriptor) -> Result<FetchOutcome> {
        match descriptor {
            QueryDescriptor::Collection(query) => {
                self.fetch_list(query).await.map(FetchOutcome::Rows)
            }
            QueryDescriptor::Document(query) => Ok(match self.fetch_one(query).await? {
                Some(row) => FetchOutcome::Document(row),
                None => FetchOutcome::Absent,
            }),
        }
    }

    async fn bounded<T>(
        &self,
        read: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::FetchTimeout(limit).into()),
            },
            None => read.await,
        }
    }
}

impl std::fmt::Debug for FetchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchExecutor")
            .field("timeout", &self.timeout)
            .finish()
    }
}
