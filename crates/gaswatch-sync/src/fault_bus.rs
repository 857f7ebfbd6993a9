//! Process-wide fault bus
//!
//! A publish/subscribe registry for failures that must reach UI layers
//! other than the one whose query failed. Handlers are keyed by
//! [`ErrorKind`].
//!
//! ## Lifecycle
//!
//! ```text
//! UI mount    ──→  bus.on(kind, handler)  ──→  FaultSubscription
//! emit(kind)  ──→  every handler registered for `kind` right now, once
//! UI unmount  ──→  drop(FaultSubscription) (or .unsubscribe())
//! ```
//!
//! Delivery is best-effort and synchronous on the emitting task. Handlers
//! registered after an emission never see it. Handlers are invoked
//! outside the registry lock, so a handler may register or drop
//! subscriptions itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use tracing::debug;

use gaswatch_core::domain::{ClassifiedError, ErrorKind};

type FaultHandler = Arc<dyn Fn(&ClassifiedError) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: DashMap<ErrorKind, Vec<(u64, FaultHandler)>>,
    next_id: AtomicU64,
}

/// Publish/subscribe channel for classified faults
///
/// Cloning is cheap; clones share one registry. [`FaultBus::global`] is the
/// process-wide instance live queries report to by default.
#[derive(Clone, Default)]
pub struct FaultBus {
    registry: Arc<Registry>,
}

static GLOBAL_BUS: OnceLock<FaultBus> = OnceLock::new();

impl FaultBus {
    /// Creates an independent bus
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus
    pub fn global() -> &'static FaultBus {
        GLOBAL_BUS.get_or_init(FaultBus::new)
    }

    /// Registers `handler` for faults of `kind`
    ///
    /// The handler stays registered until the returned subscription is
    /// dropped or unsubscribed.
    pub fn on(
        &self,
        kind: ErrorKind,
        handler: impl Fn(&ClassifiedError) + Send + Sync + 'static,
    ) -> FaultSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!(%kind, id, "Fault handler registered");

        FaultSubscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            active: true,
        }
    }

    /// Delivers `payload` to every handler currently registered for `kind`
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, kind: ErrorKind, payload: ClassifiedError) -> usize {
        // Snapshot under the shard lock, call outside it.
        let handlers: Vec<FaultHandler> = match self.registry.handlers.get(&kind) {
            Some(entry) => entry.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => Vec::new(),
        };

        debug!(%kind, path = %payload.resource_path, handlers = handlers.len(), "Emitting fault");

        for handler in &handlers {
            handler(&payload);
        }
        handlers.len()
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: ErrorKind) -> usize {
        self.registry
            .handlers
            .get(&kind)
            .map_or(0, |entry| entry.len())
    }
}

impl std::fmt::Debug for FaultBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: usize = self
            .registry
            .handlers
            .iter()
            .map(|entry| entry.value().len())
            .sum();
        f.debug_struct("FaultBus")
            .field("handlers", &registered)
            .finish()
    }
}

/// Registration of one fault handler; dropping it deregisters the handler
#[must_use = "dropping the subscription deregisters the handler immediately"]
pub struct FaultSubscription {
    registry: Weak<Registry>,
    kind: ErrorKind,
    id: u64,
    active: bool,
}

impl FaultSubscription {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Deregisters the handler now
    pub fn unsubscribe(mut self) {
        self.deregister();
    }

    fn deregister(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(mut entry) = registry.handlers.get_mut(&self.kind) {
            entry.retain(|(id, _)| *id != self.id);
        }
        debug!(kind = %self.kind, id = self.id, "Fault handler deregistered");
    }
}

impl Drop for FaultSubscription {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl std::fmt::Debug for FaultSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultSubscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
