//! GasWatch Cache - SQLite record store
//!
//! SQLite-backed storage for:
//! - Sensor, device and alert records of any source
//! - Filtered, ordered, limited collection reads
//! - Point reads by id
//! - Change notifications for every write
//!
//! ## Architecture
//!
//! This crate implements the `IDataService` and `IChangeFeed` ports from
//! `gaswatch-core` using SQLite as the storage backend. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteDataService`] - Port implementation plus the write operations
//! - [`ReadPolicy`] - Which sources reads and subscriptions may touch
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use gaswatch_cache::{DatabasePool, SqliteDataService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/gaswatch/records.db")).await?;
//! let service = SqliteDataService::new(pool.pool().clone());
//! // Use service as IDataService and IChangeFeed...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::{DatabasePool, Location};
pub use repository::{ReadPolicy, SqliteDataService};

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of a record body failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A record body is not usable as a row
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
