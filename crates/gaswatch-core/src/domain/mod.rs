//! Domain entities and business logic
//!
//! This module contains the core domain types for GasWatch:
//! - Query descriptors, their refresh strategy and canonical identity keys
//! - Rows and fetch outcomes returned by the backend
//! - The observable sync state and its classified errors
//! - Domain-specific error types

pub mod errors;
pub mod query;
pub mod row;
pub mod state;

// Re-export commonly used types
pub use errors::{BackendError, DomainError};
pub use query::{
    identity_key, CollectionQuery, DocumentQuery, IdentityKey, OrderBy, QueryDescriptor,
    QuerySpec, RefreshStrategy, Scalar, SpecKind,
};
pub use row::{row_id, FetchOutcome, QueryData, Row, CREATED_AT_FIELD, ID_FIELD};
pub use state::{ClassifiedError, ErrorKind, Phase, SyncState, UNKNOWN_RESOURCE_PATH};
