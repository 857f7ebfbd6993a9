//! Error classification
//!
//! Turns raw read failures into [`ClassifiedError`] values. Permission
//! failures are additionally reported on the [`FaultBus`] so UI layers
//! unrelated to the failing query (a global toast, for instance) can react.
//!
//! ## Rules
//!
//! | Failure                                        | Kind               |
//! |------------------------------------------------|--------------------|
//! | `BackendError::PermissionDenied`, code `42501`/`PGRST301` | PermissionDenied |
//! | `BackendError::NotFound`, code `PGRST116`      | NotFound           |
//! | `BackendError::{Timeout, Unavailable}`, codes `08*`/`57014`/`53300` | Transient |
//! | fetch timeout, I/O timeout or connection error | Transient          |
//! | message mentions permission / row-level security | PermissionDenied |
//! | anything else                                  | Unknown            |

use std::io;

use tracing::{debug, warn};

use gaswatch_core::domain::{
    BackendError, ClassifiedError, ErrorKind, QueryDescriptor, UNKNOWN_RESOURCE_PATH,
};

use crate::fault_bus::FaultBus;
use crate::SyncError;

/// Message fragments that identify an access-policy rejection
const PERMISSION_MARKERS: &[&str] = &["permission denied", "row-level security", "not authorized"];

/// Classifies failures and reports permission faults
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    bus: FaultBus,
}

impl ErrorClassifier {
    /// Creates a classifier reporting to `bus`
    pub fn new(bus: FaultBus) -> Self {
        Self { bus }
    }

    /// Classifies `err` for the read described by `descriptor`
    ///
    /// Pure: nothing is emitted.
    pub fn classify(
        &self,
        err: &anyhow::Error,
        descriptor: Option<&QueryDescriptor>,
    ) -> ClassifiedError {
        ClassifiedError::new(classify_kind(err), resource_path(descriptor), format!("{err:#}"))
    }

    /// Classifies `err` and emits it on the fault bus if it is a permission failure
    pub fn classify_and_report(
        &self,
        err: &anyhow::Error,
        descriptor: Option<&QueryDescriptor>,
    ) -> ClassifiedError {
        let classified = self.classify(err, descriptor);
        self.report(&classified);
        classified
    }

    /// Emits an already classified error if it is a permission failure
    pub fn report(&self, classified: &ClassifiedError) {
        if classified.is_permission_denied() {
            warn!(
                path = %classified.resource_path,
                error = %classified.message,
                "Read rejected by access policy"
            );
            self.bus.emit(ErrorKind::PermissionDenied, classified.clone());
        } else {
            debug!(
                kind = %classified.kind,
                path = %classified.resource_path,
                "Read failed"
            );
        }
    }

    pub fn bus(&self) -> &FaultBus {
        &self.bus
    }
}

/// Best-effort path of the resource a descriptor reads
///
/// Collections render as `/<source>?<field>=<value>&...` with fields in
/// sorted order, documents as `/<source>/<id>`. Absent descriptors and
/// descriptors without a source resolve to [`UNKNOWN_RESOURCE_PATH`].
pub fn resource_path(descriptor: Option<&QueryDescriptor>) -> String {
    let Some(descriptor) = descriptor else {
        return UNKNOWN_RESOURCE_PATH.to_string();
    };
    if descriptor.source().is_empty() {
        return UNKNOWN_RESOURCE_PATH.to_string();
    }

    match descriptor {
        QueryDescriptor::Collection(query) => {
            let mut path = format!("/{}", query.source());
            if !query.filters().is_empty() {
                let params = query
                    .filters()
                    .iter()
                    .map(|(field, value)| format!("{field}={value}"))
                    .collect::<Vec<_>>()
                    .join("&");
                path.push('?');
                path.push_str(&params);
            }
            path
        }
        QueryDescriptor::Document(query) if query.id().is_empty() => {
            format!("/{}", query.source())
        }
        QueryDescriptor::Document(query) => format!("/{}/{}", query.source(), query.id()),
    }
}

/// Determines the error kind by walking the error chain
fn classify_kind(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(backend) = cause.downcast_ref::<BackendError>() {
            let kind = match backend {
                BackendError::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
                BackendError::NotFound(_) => Some(ErrorKind::NotFound),
                BackendError::Timeout(_) | BackendError::Unavailable(_) => {
                    Some(ErrorKind::Transient)
                }
                BackendError::Coded { code, .. } => kind_for_code(code),
            };
            if let Some(kind) = kind {
                return kind;
            }
        }

        if let Some(SyncError::FetchTimeout(_)) = cause.downcast_ref::<SyncError>() {
            return ErrorKind::Transient;
        }

        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return ErrorKind::Transient;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe => return ErrorKind::Transient,
                io::ErrorKind::PermissionDenied => return ErrorKind::PermissionDenied,
                _ => {}
            }
        }
    }

    let message = format!("{err:#}").to_lowercase();
    if PERMISSION_MARKERS.iter().any(|marker| message.contains(marker)) {
        return ErrorKind::PermissionDenied;
    }

    ErrorKind::Unknown
}

/// Maps PostgREST / SQLSTATE style codes to a kind
fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "42501" | "PGRST301" => Some(ErrorKind::PermissionDenied),
        "PGRST116" => Some(ErrorKind::NotFound),
        "57014" | "53300" => Some(ErrorKind::Transient),
        c if c.starts_with("08") => Some(ErrorKind::Transient),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use gaswatch_core::domain::{CollectionQuery, DocumentQuery};

    use super::*;

    fn devices_for_u1() -> QueryDescriptor {
        CollectionQuery::new("devices").filter("user_id", "u1").into()
    }

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(FaultBus::new())
    }

    #[test]
    fn test_backend_errors_map_directly() {
        let c = classifier();
        let cases = [
            (BackendError::PermissionDenied("x".into()), ErrorKind::PermissionDenied),
            (BackendError::NotFound("x".into()), ErrorKind::NotFound),
            (BackendError::Timeout(Duration::from_secs(1)), ErrorKind::Transient),
            (BackendError::Unavailable("down".into()), ErrorKind::Transient),
        ];

        for (backend, expected) in cases {
            let err = anyhow::Error::new(backend).context("Failed to read collection 'devices'");
            assert_eq!(c.classify(&err, None).kind, expected);
        }
    }

    #[test]
    fn test_codes() {
        let coded = |code: &str| {
            anyhow::Error::new(BackendError::Coded {
                code: code.into(),
                message: "boom".into(),
            })
        };
        let c = classifier();

        assert_eq!(c.classify(&coded("42501"), None).kind, ErrorKind::PermissionDenied);
        assert_eq!(c.classify(&coded("PGRST116"), None).kind, ErrorKind::NotFound);
        assert_eq!(c.classify(&coded("08006"), None).kind, ErrorKind::Transient);
        assert_eq!(c.classify(&coded("57014"), None).kind, ErrorKind::Transient);
        assert_eq!(c.classify(&coded("23505"), None).kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_timeouts_and_io_are_transient() {
        let c = classifier();

        let timeout = anyhow::Error::new(SyncError::FetchTimeout(Duration::from_secs(5)));
        assert_eq!(c.classify(&timeout, None).kind, ErrorKind::Transient);

        let refused = anyhow::Error::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(c.classify(&refused, None).kind, ErrorKind::Transient);
    }

    #[test]
    fn test_message_heuristic_and_unknown_passthrough() {
        let c = classifier();

        let rls = anyhow::anyhow!("new row violates row-level security policy for table \"devices\"");
        assert_eq!(c.classify(&rls, None).kind, ErrorKind::PermissionDenied);

        let odd = anyhow::anyhow!("unexpected token at line 3");
        let classified = c.classify(&odd, None);
        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert_eq!(classified.message, "unexpected token at line 3");
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(resource_path(Some(&devices_for_u1())), "/devices?user_id=u1");

        let multi: QueryDescriptor = CollectionQuery::new("alerts")
            .filter("severity", 3i64)
            .filter("device_id", "d1")
            .into();
        assert_eq!(resource_path(Some(&multi)), "/alerts?device_id=d1&severity=3");

        let doc: QueryDescriptor = DocumentQuery::new("devices", "d1").into();
        assert_eq!(resource_path(Some(&doc)), "/devices/d1");

        let nameless: QueryDescriptor = CollectionQuery::new("").into();
        assert_eq!(resource_path(Some(&nameless)), UNKNOWN_RESOURCE_PATH);
        assert_eq!(resource_path(None), UNKNOWN_RESOURCE_PATH);
    }

    #[test]
    fn test_only_permission_errors_are_reported() {
        let bus = FaultBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = bus.on(ErrorKind::PermissionDenied, move |fault| {
            assert!(fault.resource_path.contains("devices"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let c = ErrorClassifier::new(bus.clone());
        let descriptor = devices_for_u1();

        let denied = anyhow::Error::new(BackendError::PermissionDenied("devices".into()));
        let classified = c.classify_and_report(&denied, Some(&descriptor));
        assert_eq!(classified.resource_path, "/devices?user_id=u1");

        let transient = anyhow::Error::new(BackendError::Unavailable("down".into()));
        c.classify_and_report(&transient, Some(&descriptor));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
