//! SQLite pool behind the record store
//!
//! File databases run in WAL mode so a `watch` reading the store does not
//! block writers in other processes. In-memory databases live exactly as
//! long as their single connection, so that connection is pinned for the
//! lifetime of the pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use gaswatch_core::config::BackendConfig;

use crate::CacheError;

const FILE_POOL_SIZE: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const RECORDS_SCHEMA: &str = include_str!("migrations/20261018_records.sql");

/// Where the records live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Memory,
}

/// Connection pool for the GasWatch record store
#[derive(Debug)]
pub struct DatabasePool {
    pool: SqlitePool,
    location: Location,
}

impl DatabasePool {
    /// Opens (creating if needed) the record store at `db_path`
    ///
    /// Missing parent directories are created. The `records` table is
    /// created on first open.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the directory or database cannot be opened,
    /// `MigrationFailed` if the table cannot be created.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Cannot create directory {} for the record store: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Cannot open record store {}: {e}",
                    db_path.display()
                ))
            })?;

        let this = Self::ready(pool, Location::File(db_path.to_path_buf())).await?;
        tracing::info!(path = %db_path.display(), "Record store opened");
        Ok(this)
    }

    /// Opens an empty record store held in memory
    ///
    /// # Errors
    ///
    /// As [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        // Recycling the only connection would drop every record.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot open in-memory record store: {e}"))
            })?;

        let this = Self::ready(pool, Location::Memory).await?;
        tracing::debug!("In-memory record store opened");
        Ok(this)
    }

    /// Opens the store configured under `backend.database`
    pub async fn from_config(config: &BackendConfig) -> Result<Self, CacheError> {
        Self::new(&config.database).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    async fn ready(pool: SqlitePool, location: Location) -> Result<Self, CacheError> {
        Self::create_schema(&pool).await?;
        Ok(Self { pool, location })
    }

    /// Creates the `records` table; safe to run against an existing store
    async fn create_schema(pool: &SqlitePool) -> Result<(), CacheError> {
        sqlx::raw_sql(RECORDS_SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("Cannot create records table: {e}")))?;
        tracing::debug!("Records schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn record_count(pool: &DatabasePool) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(pool.pool())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn test_file_database_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.db");

        let pool = DatabasePool::new(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(pool.location(), &Location::File(path.clone()));
        assert_eq!(record_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let first = DatabasePool::new(&path).await.unwrap();
        sqlx::query(
            "INSERT INTO records (source, id, created_at, body) VALUES ('devices', 'd1', '', '{}')",
        )
        .execute(first.pool())
        .await
        .unwrap();
        first.pool().close().await;

        let second = DatabasePool::new(&path).await.unwrap();
        assert_eq!(record_count(&second).await, 1);
    }

    #[tokio::test]
    async fn test_schema_creation_is_rerunnable() {
        let pool = DatabasePool::in_memory().await.unwrap();
        assert_eq!(pool.location(), &Location::Memory);
        DatabasePool::create_schema(pool.pool()).await.unwrap();
        assert_eq!(record_count(&pool).await, 0);
    }
}
