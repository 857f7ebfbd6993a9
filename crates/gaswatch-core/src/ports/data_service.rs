//! Data service port (driven/secondary port)
//!
//! This module defines the interface for point-in-time reads against the
//! backend. The sync layer's fetch executor is the only caller.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because backend failures are adapter-specific.
//!   Adapters should wrap classifiable failures in
//!   [`BackendError`](crate::domain::BackendError) so the classifier can
//!   recognise them.
//! - A point read that finds nothing returns `Ok(None)`, never an error.
//! - Reads have no side effects and may run concurrently for different
//!   descriptors.

use crate::domain::{CollectionQuery, DocumentQuery, Row};

/// Port trait for backend reads
///
/// ## Implementation Notes
///
/// `fetch_list` is equivalent to
/// `SELECT * FROM <source> WHERE <filters AND'd> ORDER BY <field> LIMIT <n>`:
/// equality filters first, then ordering
/// ([`CollectionQuery::effective_order`]), then the limit. Every returned
/// row must carry an `id` field.
#[async_trait::async_trait]
pub trait IDataService: Send + Sync {
    /// Reads the rows of a collection query
    async fn fetch_list(&self, query: &CollectionQuery) -> anyhow::Result<Vec<Row>>;

    /// Reads one row by id; `None` when it does not exist
    async fn fetch_one(&self, query: &DocumentQuery) -> anyhow::Result<Option<Row>>;
}
