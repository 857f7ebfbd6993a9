//! SQLite implementation of IDataService and IChangeFeed
//!
//! Every source shares one `records` table. A record is a JSON object
//! stored in `body`; its `id` and `created_at` are mirrored into columns
//! so point reads and the default ordering use the index.
//!
//! ## Query Mapping
//!
//! | Descriptor part        | SQL                                           |
//! |------------------------|-----------------------------------------------|
//! | source                 | `source = ?`                                  |
//! | filter `id`            | `id = ?`                                      |
//! | filter `created_at`    | `created_at = ?`                              |
//! | filter other field     | `json_extract(body, '$.<field>') = ?`         |
//! | filter value `null`    | `... IS NULL`                                 |
//! | filter value bool      | bound as `1` / `0` (JSON booleans extract so) |
//! | ordering               | same expression, then `seq` in the same direction |
//! | limit                  | `LIMIT ?`                                     |
//!
//! ## Change Feed
//!
//! Writes made through [`SqliteDataService::insert`], [`update`] and
//! [`delete`] publish a [`ChangeEvent`] on an in-process broadcast
//! channel. Writes made by other processes are not observed.
//!
//! [`update`]: SqliteDataService::update
//! [`delete`]: SqliteDataService::delete

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use gaswatch_core::config::Config;
use gaswatch_core::domain::{
    BackendError, CollectionQuery, DocumentQuery, OrderBy, Row, Scalar, CREATED_AT_FIELD, ID_FIELD,
};
use gaswatch_core::ports::{
    ChangeEvent, ChangeOperation, ChangeScope, ChangeSubscription, IChangeFeed, IDataService,
    SubscriptionHandle,
};

use crate::CacheError;

/// Schema stamped on change events when none is configured
const DEFAULT_SCHEMA: &str = "public";

/// Default capacity of the change broadcast channel
const DEFAULT_CHANGE_BUFFER: usize = 256;

// ============================================================================
// ReadPolicy
// ============================================================================

/// Which sources reads and change subscriptions may touch
///
/// The local counterpart of a row-level access policy: a denied read fails
/// with [`BackendError::PermissionDenied`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPolicy {
    allowed: Option<HashSet<String>>,
}

impl ReadPolicy {
    /// Permits every source
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Permits only the given sources
    pub fn only<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(sources.into_iter().map(Into::into).collect()),
        }
    }

    pub fn permits(&self, source: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(source))
    }

    fn check(&self, source: &str, action: &str) -> Result<(), BackendError> {
        if self.permits(source) {
            Ok(())
        } else {
            tracing::warn!(source, action, "Access denied by read policy");
            Err(BackendError::PermissionDenied(format!(
                "{action} on '{source}' is not allowed"
            )))
        }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// A value bound to a query placeholder
#[derive(Debug, Clone)]
enum Bind {
    Text(String),
    Integer(i64),
    Float(f64),
}

/// SQL expression reading `field` of a record, with its bind if any
fn field_expr(field: &str) -> (&'static str, Option<Bind>) {
    match field {
        ID_FIELD => ("id", None),
        CREATED_AT_FIELD => ("created_at", None),
        other => ("json_extract(body, ?)", Some(Bind::Text(format!("$.{other}")))),
    }
}

/// Bind for a filter value; `None` for null
fn scalar_bind(value: &Scalar) -> Option<Bind> {
    match value {
        Scalar::Null => None,
        Scalar::Bool(b) => Some(Bind::Integer(i64::from(*b))),
        Scalar::Integer(i) => Some(Bind::Integer(*i)),
        Scalar::Float(f) => Some(Bind::Float(*f)),
        Scalar::Text(s) => Some(Bind::Text(s.clone())),
    }
}

/// Builds the SELECT for a collection query
fn collection_sql(query: &CollectionQuery) -> (String, Vec<Bind>) {
    let mut sql = String::from("SELECT body FROM records WHERE source = ?");
    let mut binds = vec![Bind::Text(query.source().to_string())];

    for (field, value) in query.filters() {
        let (expr, path) = field_expr(field);
        binds.extend(path);
        match scalar_bind(value) {
            Some(bind) => {
                sql.push_str(&format!(" AND {expr} = ?"));
                binds.push(bind);
            }
            None => sql.push_str(&format!(" AND {expr} IS NULL")),
        }
    }

    let order: OrderBy = query.effective_order();
    let direction = if order.ascending { "ASC" } else { "DESC" };
    let (expr, path) = field_expr(&order.field);
    binds.extend(path);
    sql.push_str(&format!(" ORDER BY {expr} {direction}, seq {direction}"));

    if let Some(limit) = query.limit_value() {
        sql.push_str(" LIMIT ?");
        binds.push(Bind::Integer(i64::from(limit.get())));
    }

    (sql, binds)
}

/// Parses a stored body back into a row
fn row_from_record(record: &SqliteRow) -> Result<Row, CacheError> {
    let body: String = record.try_get("body")?;
    match serde_json::from_str(&body) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(CacheError::SerializationError(format!(
            "Stored body is not an object: {other}"
        ))),
        Err(e) => Err(CacheError::SerializationError(format!(
            "Invalid record JSON: {e}"
        ))),
    }
}

/// Maps connection-level failures to a transient backend error
fn read_error(err: sqlx::Error) -> anyhow::Error {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::Unavailable(err.to_string()).into()
        }
        sqlx::Error::Database(ref db) => match db.code() {
            // SQLITE_BUSY / SQLITE_LOCKED
            Some(code) if code == "5" || code == "6" => {
                BackendError::Unavailable(db.message().to_string()).into()
            }
            _ => CacheError::QueryFailed(err.to_string()).into(),
        },
        other => CacheError::QueryFailed(other.to_string()).into(),
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// SqliteDataService
// ============================================================================

/// SQLite-based implementation of the data-service and change-feed ports
///
/// Cloning is cheap; clones share the pool, the change channel and the
/// subscription counter.
#[derive(Clone)]
pub struct SqliteDataService {
    pool: SqlitePool,
    schema: String,
    policy: ReadPolicy,
    changes: broadcast::Sender<ChangeEvent>,
    open_subscriptions: Arc<AtomicUsize>,
}

impl SqliteDataService {
    /// Creates a service with the default schema and change buffer
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_BUFFER);
        Self {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
            policy: ReadPolicy::allow_all(),
            changes,
            open_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a service using the schema, buffer and policy from `config`
    pub fn from_config(pool: SqlitePool, config: &Config) -> Self {
        let policy = match &config.backend.allowed_sources {
            Some(sources) => ReadPolicy::only(sources.iter().cloned()),
            None => ReadPolicy::allow_all(),
        };
        Self::new(pool)
            .with_schema(config.sync.schema.clone())
            .with_change_buffer(config.sync.change_buffer)
            .with_policy(policy)
    }

    /// Stamps change events with `schema`
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Replaces the change channel with one holding `capacity` events
    ///
    /// Receivers that fall further behind observe a lag.
    pub fn with_change_buffer(mut self, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        self.changes = changes;
        self
    }

    pub fn with_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Number of change subscriptions currently open
    pub fn open_subscriptions(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }

    /// Inserts a record into `source`
    ///
    /// The body must be a JSON object. A missing `id` is generated; a
    /// missing `created_at` is set to now. Returns the stored row.
    ///
    /// # Errors
    /// `InvalidRecord` for non-object bodies or non-string ids, and
    /// `QueryFailed` if the id already exists in `source`.
    pub async fn insert(&self, source: &str, body: Value) -> Result<Row, CacheError> {
        let Value::Object(mut row) = body else {
            return Err(CacheError::InvalidRecord(format!(
                "Record for '{source}' must be a JSON object"
            )));
        };

        let id = match row.get(ID_FIELD) {
            None | Some(Value::Null) => Uuid::new_v4().to_string(),
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(CacheError::InvalidRecord(format!(
                    "Record id must be a non-empty string, got {other}"
                )))
            }
        };
        let created_at = match row.get(CREATED_AT_FIELD) {
            Some(Value::String(ts)) => ts.clone(),
            _ => now_timestamp(),
        };
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        row.insert(CREATED_AT_FIELD.to_string(), Value::String(created_at.clone()));

        let body = serde_json::to_string(&row)
            .map_err(|e| CacheError::SerializationError(format!("Failed to encode record: {e}")))?;

        sqlx::query("INSERT INTO records (source, id, created_at, body) VALUES (?, ?, ?, ?)")
            .bind(source)
            .bind(&id)
            .bind(&created_at)
            .bind(&body)
            .execute(&self.pool)
            .await?;

        tracing::debug!(source, id = %id, "Inserted record");
        self.notify(source, ChangeOperation::Insert, &id);
        Ok(row)
    }

    /// Merges `patch` into the record `id` of `source`
    ///
    /// Top-level keys of the patch replace those of the stored body; `id`
    /// and `created_at` are kept. Returns `None` if the record does not
    /// exist.
    pub async fn update(
        &self,
        source: &str,
        id: &str,
        patch: Value,
    ) -> Result<Option<Row>, CacheError> {
        let Value::Object(patch) = patch else {
            return Err(CacheError::InvalidRecord(format!(
                "Patch for '{source}/{id}' must be a JSON object"
            )));
        };

        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading so concurrent merges serialize.
        let touched = sqlx::query("UPDATE records SET body = body WHERE source = ? AND id = ?")
            .bind(source)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Ok(None);
        }

        let record = sqlx::query("SELECT body FROM records WHERE source = ? AND id = ?")
            .bind(source)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let mut row = row_from_record(&record)?;
        for (key, value) in patch {
            if key != ID_FIELD && key != CREATED_AT_FIELD {
                row.insert(key, value);
            }
        }

        let body = serde_json::to_string(&row)
            .map_err(|e| CacheError::SerializationError(format!("Failed to encode record: {e}")))?;
        sqlx::query("UPDATE records SET body = ? WHERE source = ? AND id = ?")
            .bind(&body)
            .bind(source)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(source, id, "Updated record");
        self.notify(source, ChangeOperation::Update, id);
        Ok(Some(row))
    }

    /// Deletes the record `id` of `source`; returns whether it existed
    pub async fn delete(&self, source: &str, id: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM records WHERE source = ? AND id = ?")
            .bind(source)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::debug!(source, id, "Deleted record");
            self.notify(source, ChangeOperation::Delete, id);
        }
        Ok(deleted)
    }

    fn notify(&self, source: &str, operation: ChangeOperation, id: &str) {
        let event = ChangeEvent::new(&self.schema, source, operation, Some(id.to_string()));
        // No receivers is not an error: nobody is watching.
        let receivers = self.changes.send(event).unwrap_or(0);
        tracing::trace!(source, %operation, receivers, "Published change");
    }
}

impl std::fmt::Debug for SqliteDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDataService")
            .field("schema", &self.schema)
            .field("policy", &self.policy)
            .field("open_subscriptions", &self.open_subscriptions())
            .finish()
    }
}

// ============================================================================
// IDataService implementation
// ============================================================================

#[async_trait]
impl IDataService for SqliteDataService {
    async fn fetch_list(&self, query: &CollectionQuery) -> anyhow::Result<Vec<Row>> {
        self.policy.check(query.source(), "read")?;

        let (sql, binds) = collection_sql(query);
        let mut statement = sqlx::query(&sql);
        for bind in binds {
            statement = match bind {
                Bind::Text(s) => statement.bind(s),
                Bind::Integer(i) => statement.bind(i),
                Bind::Float(f) => statement.bind(f),
            };
        }

        let records = statement.fetch_all(&self.pool).await.map_err(read_error)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(row_from_record(record)?);
        }

        tracing::trace!(source = query.source(), rows = rows.len(), "Listed records");
        Ok(rows)
    }

    async fn fetch_one(&self, query: &DocumentQuery) -> anyhow::Result<Option<Row>> {
        self.policy.check(query.source(), "read")?;

        let record = sqlx::query("SELECT body FROM records WHERE source = ? AND id = ?")
            .bind(query.source())
            .bind(query.id())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)?;

        Ok(record.as_ref().map(row_from_record).transpose()?)
    }
}

// ============================================================================
// IChangeFeed implementation
// ============================================================================

impl IChangeFeed for SqliteDataService {
    fn subscribe(&self, scope: &ChangeScope) -> anyhow::Result<ChangeSubscription> {
        self.policy.check(scope.source(), "subscribe")?;

        let events = self.changes.subscribe();
        let open = Arc::clone(&self.open_subscriptions);
        open.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(scope = %scope, "Change subscription registered");

        let handle = SubscriptionHandle::new(move || {
            open.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(ChangeSubscription::new(scope.clone(), events, handle))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;

    #[test]
    fn test_collection_sql_binds_in_placeholder_order() {
        let query = CollectionQuery::new("devices")
            .filter("user_id", "u1")
            .filter("online", true)
            .filter("retired_at", Scalar::Null)
            .limit(NonZeroU32::new(5).unwrap());

        let (sql, binds) = collection_sql(&query);

        assert_eq!(
            sql,
            "SELECT body FROM records WHERE source = ? \
             AND json_extract(body, ?) = ? \
             AND json_extract(body, ?) IS NULL \
             AND json_extract(body, ?) = ? \
             ORDER BY created_at DESC, seq DESC LIMIT ?"
        );
        assert_eq!(sql.matches('?').count(), binds.len());
        assert!(matches!(&binds[1], Bind::Text(path) if path == "$.online"));
        assert!(matches!(binds[2], Bind::Integer(1)));
        assert!(matches!(binds.last(), Some(Bind::Integer(5))));
    }

    #[test]
    fn test_explicit_order_uses_body_field() {
        let query = CollectionQuery::new("alerts").order_by(OrderBy::new("severity").ascending());
        let (sql, binds) = collection_sql(&query);

        assert!(sql.ends_with("ORDER BY json_extract(body, ?) ASC, seq ASC"));
        assert!(matches!(&binds[1], Bind::Text(path) if path == "$.severity"));
    }

    #[test]
    fn test_policy() {
        let policy = ReadPolicy::only(["devices"]);
        assert!(policy.permits("devices"));
        assert!(!policy.permits("alerts"));
        assert!(matches!(
            policy.check("alerts", "read"),
            Err(BackendError::PermissionDenied(_))
        ));
        assert!(ReadPolicy::allow_all().permits("anything"));
    }
}
