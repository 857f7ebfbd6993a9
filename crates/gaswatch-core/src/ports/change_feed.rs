//! Change feed port (driven/secondary port)
//!
//! This module defines the interface for push-based change notifications.
//! A subscription is scoped to a collection (`source`, `schema`) or to a
//! single document (`source`, `id`) and delivers coarse events: the
//! operation that happened, never a payload to merge.
//!
//! ## Design Notes
//!
//! - `subscribe` is synchronous so the sync engine can close the previous
//!   subscription and open the next one without an await point in between.
//! - Events travel over a `tokio::sync::broadcast` channel; a lagging
//!   subscriber sees `RecvError::Lagged`, which still means "something
//!   changed".
//! - [`SubscriptionHandle`] is an RAII guard: dropping it closes the
//!   subscription. Closing twice is a no-op.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{DocumentQuery, QueryDescriptor};

// ============================================================================
// ChangeEvent
// ============================================================================

/// Kind of write that produced a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A change notification published by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub schema: String,
    pub source: String,
    pub operation: ChangeOperation,
    /// Id of the affected row, when the backend reports it
    pub record_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(
        schema: impl Into<String>,
        source: impl Into<String>,
        operation: ChangeOperation,
        record_id: Option<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            source: source.into(),
            operation,
            record_id,
        }
    }
}

// ============================================================================
// ChangeScope
// ============================================================================

/// What a change subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeScope {
    /// Every change to `source` within `schema`
    Collection { schema: String, source: String },
    /// Changes to one row of `source`
    Document { source: String, id: String },
}

impl ChangeScope {
    /// Scope a descriptor's notifier subscribes to
    pub fn for_descriptor(descriptor: &QueryDescriptor, schema: &str) -> Self {
        match descriptor {
            QueryDescriptor::Collection(q) => ChangeScope::Collection {
                schema: schema.to_string(),
                source: q.source().to_string(),
            },
            QueryDescriptor::Document(q) => Self::for_document(q),
        }
    }

    pub fn for_document(query: &DocumentQuery) -> Self {
        ChangeScope::Document {
            source: query.source().to_string(),
            id: query.id().to_string(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            ChangeScope::Collection { source, .. } | ChangeScope::Document { source, .. } => {
                source
            }
        }
    }

    /// Returns true if `event` falls within this scope
    ///
    /// Document scopes ignore the schema; an event without a record id
    /// cannot be attributed to a document and does not match.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            ChangeScope::Collection { schema, source } => {
                event.schema == *schema && event.source == *source
            }
            ChangeScope::Document { source, id } => {
                event.source == *source && event.record_id.as_deref() == Some(id.as_str())
            }
        }
    }
}

impl std::fmt::Display for ChangeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeScope::Collection { schema, source } => write!(f, "{schema}:{source}"),
            ChangeScope::Document { source, id } => write!(f, "{source}:id={id}"),
        }
    }
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// RAII handle for an open change subscription
///
/// When this handle is closed or dropped, the associated subscription is
/// released. The close callback runs at most once.
pub struct SubscriptionHandle {
    /// Callback to invoke when the subscription is closed
    close_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// Creates a new handle with the given close callback
    pub fn new(close_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            close_fn: Some(Box::new(close_fn)),
        }
    }

    /// A handle with nothing to release
    pub fn detached() -> Self {
        Self { close_fn: None }
    }

    /// Closes the subscription; later calls do nothing
    pub fn close(&mut self) {
        if let Some(close_fn) = self.close_fn.take() {
            close_fn();
        }
    }

    /// Returns true until the handle is closed
    pub fn is_open(&self) -> bool {
        self.close_fn.is_some()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// ChangeSubscription
// ============================================================================

/// An open subscription: its scope, its event receiver and its handle
#[derive(Debug)]
pub struct ChangeSubscription {
    pub scope: ChangeScope,
    pub events: broadcast::Receiver<ChangeEvent>,
    pub handle: SubscriptionHandle,
}

impl ChangeSubscription {
    pub fn new(
        scope: ChangeScope,
        events: broadcast::Receiver<ChangeEvent>,
        handle: SubscriptionHandle,
    ) -> Self {
        Self {
            scope,
            events,
            handle,
        }
    }
}

// ============================================================================
// IChangeFeed trait
// ============================================================================

/// Port trait for push-based change notifications
///
/// ## Implementation Notes
///
/// - Implementations may deliver events outside the requested scope; the
///   notifier filters with [`ChangeScope::matches`].
/// - A subscription the backend refuses (e.g. access policy) should fail
///   with a [`BackendError`](crate::domain::BackendError).
pub trait IChangeFeed: Send + Sync {
    /// Opens a subscription for `scope`
    fn subscribe(&self, scope: &ChangeScope) -> anyhow::Result<ChangeSubscription>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::domain::CollectionQuery;

    #[test]
    fn test_collection_scope_matches_source_and_schema() {
        let descriptor: QueryDescriptor = CollectionQuery::new("devices").into();
        let scope = ChangeScope::for_descriptor(&descriptor, "public");

        let hit = ChangeEvent::new("public", "devices", ChangeOperation::Insert, None);
        let other_source = ChangeEvent::new("public", "alerts", ChangeOperation::Insert, None);
        let other_schema = ChangeEvent::new("audit", "devices", ChangeOperation::Update, None);

        assert!(scope.matches(&hit));
        assert!(!scope.matches(&other_source));
        assert!(!scope.matches(&other_schema));
    }

    #[test]
    fn test_document_scope_matches_id() {
        let scope = ChangeScope::for_document(&DocumentQuery::new("devices", "d1"));

        let hit = ChangeEvent::new("public", "devices", ChangeOperation::Delete, Some("d1".into()));
        let miss = ChangeEvent::new("public", "devices", ChangeOperation::Update, Some("d2".into()));
        let anonymous = ChangeEvent::new("public", "devices", ChangeOperation::Update, None);

        assert!(scope.matches(&hit));
        assert!(!scope.matches(&miss));
        assert!(!scope.matches(&anonymous));
        assert_eq!(scope.to_string(), "devices:id=d1");
    }

    #[test]
    fn test_handle_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let mut handle = SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_open());
        handle.close();
        handle.close();
        assert!(!handle.is_open());
        drop(handle);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let handle = SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(handle);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!SubscriptionHandle::detached().is_open());
    }
}
