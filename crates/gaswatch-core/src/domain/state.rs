//! Observable live-query state
//!
//! [`SyncState`] is the three-field result consumers render: data, a
//! loading flag and a classified error. The [`Phase`] view names the state
//! machine position derived from those fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::row::QueryData;

/// Resource path used when a failing descriptor cannot be resolved
pub const UNKNOWN_RESOURCE_PATH: &str = "unknown";

/// Classification of a failed read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The backend rejected the read under its access policy
    PermissionDenied,
    /// A point read resolved to no row where one was required
    NotFound,
    /// Network or timeout failure; a later trigger may succeed
    Transient,
    /// Anything else; message passed through verbatim
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A failure after classification
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} ({resource_path}): {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    /// Best-effort path of the resource the read targeted
    pub resource_path: String,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, resource_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            resource_path: resource_path.into(),
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == ErrorKind::PermissionDenied
    }
}

/// Position of a live query in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No descriptor is active
    Idle,
    /// A fetch is outstanding
    Loading,
    /// The last fetch succeeded
    Ready,
    /// The last fetch failed
    Failed,
}

/// The observable state of one live query
///
/// While `is_loading` is false, `data` and `error` are never both set. A
/// point read that found nothing leaves both empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SyncState {
    pub data: Option<QueryData>,
    pub is_loading: bool,
    pub error: Option<ClassifiedError>,
    /// Set once the first fetch for the active descriptor has settled
    #[serde(skip)]
    settled: bool,
}

impl SyncState {
    /// State with no active descriptor
    pub fn idle() -> Self {
        Self::default()
    }

    /// State right after a descriptor became active
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    /// State after a successful fetch
    pub fn ready(data: Option<QueryData>) -> Self {
        Self {
            data,
            is_loading: false,
            error: None,
            settled: true,
        }
    }

    /// State after a failed fetch
    pub fn failed(error: ClassifiedError) -> Self {
        Self {
            data: None,
            is_loading: false,
            error: Some(error),
            settled: true,
        }
    }

    /// Marks a refetch in flight, keeping the previous data and error visible
    pub fn begin_refetch(&mut self) {
        self.is_loading = true;
    }

    pub fn phase(&self) -> Phase {
        if self.is_loading {
            Phase::Loading
        } else if self.error.is_some() {
            Phase::Failed
        } else if self.settled {
            Phase::Ready
        } else {
            Phase::Idle
        }
    }
}
