//! Live-query state machine
//!
//! A [`LiveQuery`] keeps one observable [`SyncState`] consistent with the
//! backend for whichever descriptor is currently active.
//!
//! ## States
//!
//! ```text
//!            set descriptor              fetch ok
//!   Idle ───────────────────→ Loading ───────────→ Ready
//!    ▲                          │  ▲                 │
//!    │                fetch err │  └── change/tick ──┤ (stale data stays visible)
//!    │                          ▼                    │
//!    │                        Failed ◄───────────────┘
//!    │                          │
//!    └──── cleared / replaced ──┘ (from any state, synchronously)
//! ```
//!
//! ## Ownership
//!
//! Each active descriptor gets a generation number, one refresher (a
//! [`ChangeNotifier`] or a [`PollIntervalDriver`], never both) and one
//! driver task. The task performs the initial fetch, then one refetch per
//! trigger, awaiting each fetch before taking the next trigger. Every
//! completion is published through [`Shared::publish`], which discards it
//! unless its generation is still the active one.
//!
//! Replacing or clearing the descriptor closes the refresher and aborts
//! the task before anything new is armed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use gaswatch_core::config::SyncConfig;
use gaswatch_core::domain::{
    ClassifiedError, IdentityKey, Phase, QueryDescriptor, RefreshStrategy, SyncState,
};
use gaswatch_core::ports::{ChangeScope, IChangeFeed, IDataService};

use crate::classifier::ErrorClassifier;
use crate::fault_bus::FaultBus;
use crate::fetch::FetchExecutor;
use crate::notifier::{ChangeListener, ChangeNotifier, ChangeSignal};
use crate::poller::{PollIntervalDriver, PollTicks};

/// Schema used when none is configured
const DEFAULT_SCHEMA: &str = "public";

// ============================================================================
// Refreshers and triggers
// ============================================================================

/// Owner side of the armed refresh mechanism
#[derive(Debug)]
enum Refresher {
    Push(ChangeNotifier),
    Polled(PollIntervalDriver),
}

impl Refresher {
    fn disarm(&mut self) {
        match self {
            Refresher::Push(notifier) => notifier.close(),
            Refresher::Polled(driver) => driver.clear(),
        }
    }

    fn is_armed(&self) -> bool {
        match self {
            Refresher::Push(notifier) => notifier.is_open(),
            Refresher::Polled(driver) => driver.is_armed(),
        }
    }
}

/// Task side of the armed refresh mechanism
enum TriggerSource {
    Push(ChangeListener),
    Polled(PollTicks),
}

impl TriggerSource {
    async fn next(&mut self) -> Option<Trigger> {
        match self {
            TriggerSource::Push(listener) => listener.next_change().await.map(Trigger::Change),
            TriggerSource::Polled(ticks) => ticks.next_tick().await.map(|_| Trigger::Tick),
        }
    }
}

/// Why a refetch was started
#[derive(Debug)]
enum Trigger {
    Change(ChangeSignal),
    Tick,
    Manual,
}

enum Next {
    Fire(Trigger),
    TriggersClosed,
    Stop,
}

// ============================================================================
// Shared slot
// ============================================================================

/// The active descriptor and everything armed for it
struct ActiveQuery {
    key: IdentityKey,
    descriptor: QueryDescriptor,
    refresher: Option<Refresher>,
    manual: Option<mpsc::UnboundedSender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ActiveQuery {
    /// Closes the refresher and stops the driver task; repeat calls do nothing
    fn teardown(&mut self) {
        if let Some(mut refresher) = self.refresher.take() {
            refresher.disarm();
        }
        self.manual = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Slot {
    generation: u64,
    active: Option<ActiveQuery>,
}

struct Shared {
    slot: Mutex<Slot>,
    state_tx: watch::Sender<SyncState>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SyncState::idle());
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                active: None,
            }),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Applies `update` to the state if `generation` is still active
    ///
    /// Returns false, without touching the state, for stale completions.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut SyncState)) -> bool {
        let slot = self.lock();
        if slot.generation != generation {
            debug!(
                generation,
                current = slot.generation,
                "Discarding stale completion"
            );
            return false;
        }
        self.state_tx.send_modify(update);
        true
    }
}

// ============================================================================
// Driver task
// ============================================================================

/// Runs fetches for one generation
struct Driver {
    shared: Arc<Shared>,
    fetcher: FetchExecutor,
    classifier: ErrorClassifier,
    descriptor: QueryDescriptor,
    generation: u64,
    triggers: TriggerSource,
    triggers_open: bool,
    manual: mpsc::UnboundedReceiver<()>,
}

impl Driver {
    async fn run(mut self) {
        debug!(generation = self.generation, source = self.descriptor.source(), "Driver started");

        if !self.fetch_and_publish().await {
            return;
        }

        loop {
            let next = if self.triggers_open {
                tokio::select! {
                    trigger = self.triggers.next() => trigger.map_or(Next::TriggersClosed, Next::Fire),
                    manual = self.manual.recv() => manual.map_or(Next::Stop, |_| Next::Fire(Trigger::Manual)),
                }
            } else {
                self.manual
                    .recv()
                    .await
                    .map_or(Next::Stop, |_| Next::Fire(Trigger::Manual))
            };

            let trigger = match next {
                Next::Fire(trigger) => trigger,
                Next::TriggersClosed => {
                    // Explicit refreshes still work.
                    debug!(generation = self.generation, "Trigger source closed");
                    self.triggers_open = false;
                    continue;
                }
                Next::Stop => break,
            };
            debug!(generation = self.generation, ?trigger, "Refetch triggered");

            if !self.shared.publish(self.generation, SyncState::begin_refetch) {
                break;
            }
            if !self.fetch_and_publish().await {
                break;
            }
        }

        debug!(generation = self.generation, "Driver stopped");
    }

    /// Fetches once and publishes the outcome; false if the generation is stale
    async fn fetch_and_publish(&self) -> bool {
        match self.fetcher.execute(&self.descriptor).await {
            Ok(outcome) => {
                let data = outcome.into_data();
                self.shared
                    .publish(self.generation, move |state| *state = SyncState::ready(data))
            }
            Err(err) => {
                let classified = self.classifier.classify(&err, Some(&self.descriptor));
                let failed = SyncState::failed(classified.clone());
                if !self.shared.publish(self.generation, move |state| *state = failed) {
                    return false;
                }
                // Only failures that reached the state are broadcast.
                self.classifier.report(&classified);
                true
            }
        }
    }
}

// ============================================================================
// LiveQuery
// ============================================================================

/// Keeps a [`SyncState`] in step with the backend for one descriptor at a time
///
/// ## Usage
///
/// ```ignore
/// let live = LiveQuery::new(service, feed);
/// let mut rx = live.observe(Some(CollectionQuery::new("devices").filter("user_id", "u1").into()));
/// while rx.changed().await.is_ok() {
///     render(&rx.borrow());
/// }
/// ```
///
/// Setting a descriptor must happen inside a tokio runtime: it spawns the
/// driver task. Dropping the `LiveQuery` withdraws the descriptor.
pub struct LiveQuery {
    shared: Arc<Shared>,
    fetcher: FetchExecutor,
    feed: Arc<dyn IChangeFeed>,
    classifier: ErrorClassifier,
    schema: String,
}

impl LiveQuery {
    /// Creates an idle live query reporting faults to [`FaultBus::global`]
    pub fn new(service: Arc<dyn IDataService>, feed: Arc<dyn IChangeFeed>) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            fetcher: FetchExecutor::new(service),
            feed,
            classifier: ErrorClassifier::new(FaultBus::global().clone()),
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Creates an idle live query using the schema and timeout from `config`
    pub fn from_config(
        service: Arc<dyn IDataService>,
        feed: Arc<dyn IChangeFeed>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(service, feed)
            .with_schema(config.schema.clone())
            .with_fetch_timeout(config.fetch_timeout())
    }

    /// Reports permission faults to `bus` instead of the global bus
    pub fn with_fault_bus(mut self, bus: FaultBus) -> Self {
        self.classifier = ErrorClassifier::new(bus);
        self
    }

    /// Scopes collection subscriptions to `schema`
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Abandons fetches slower than `timeout` as transient failures
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetcher = self.fetcher.clone().with_timeout(timeout);
        self
    }

    /// Sets the descriptor and returns a receiver of every published state
    pub fn observe(&self, descriptor: Option<QueryDescriptor>) -> watch::Receiver<SyncState> {
        self.set_descriptor(descriptor);
        self.subscribe()
    }

    /// Activates `descriptor`, or withdraws the active one when `None`
    ///
    /// A descriptor whose identity equals the active one is a no-op, except
    /// in the `Failed` phase, where resubmitting it retries from scratch.
    /// Partial descriptors count as `None`.
    pub fn set_descriptor(&self, descriptor: Option<QueryDescriptor>) {
        self.apply(descriptor, false);
    }

    /// Withdraws the active descriptor
    pub fn clear(&self) {
        self.apply(None, false);
    }

    /// Refetches the active descriptor as if a change had been notified
    ///
    /// Rebuilds the query when no driver is running (e.g. its change
    /// subscription was refused).
    pub fn refresh(&self) {
        let descriptor = {
            let slot = self.shared.lock();
            let Some(active) = slot.active.as_ref() else {
                return;
            };
            match &active.manual {
                Some(manual) if manual.send(()).is_ok() => return,
                _ => active.descriptor.clone(),
            }
        };
        info!(source = descriptor.source(), "Rebuilding query on refresh");
        self.apply(Some(descriptor), true);
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SyncState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state_tx.borrow().phase()
    }

    /// Receiver of state updates, starting from the current state
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.shared.state_tx.subscribe()
    }

    /// Identity of the active descriptor
    pub fn identity(&self) -> Option<IdentityKey> {
        self.shared.lock().active.as_ref().map(|a| a.key.clone())
    }

    /// Refresh strategy currently armed, `None` when idle or disarmed
    pub fn armed_refresh(&self) -> Option<RefreshStrategy> {
        let slot = self.shared.lock();
        let refresher = slot.active.as_ref()?.refresher.as_ref()?;
        if !refresher.is_armed() {
            return None;
        }
        Some(match refresher {
            Refresher::Push(_) => RefreshStrategy::PushBased,
            Refresher::Polled(driver) => RefreshStrategy::Polled(driver.period()),
        })
    }

    fn apply(&self, descriptor: Option<QueryDescriptor>, force: bool) {
        let descriptor = descriptor.filter(QueryDescriptor::is_complete);
        let key = descriptor.as_ref().and_then(QueryDescriptor::identity_key);

        let mut slot = self.shared.lock();
        let current = slot.active.as_ref().map(|active| &active.key);

        if !force && current == key.as_ref() {
            match key {
                None => return,
                Some(_) if self.shared.state_tx.borrow().phase() != Phase::Failed => {
                    debug!(identity = ?current, "Descriptor unchanged");
                    return;
                }
                Some(_) => info!("Retrying failed query"),
            }
        }

        // Teardown strictly before anything new is armed.
        if let Some(mut previous) = slot.active.take() {
            previous.teardown();
            info!(identity = %previous.key, "Query torn down");
        }
        slot.generation += 1;
        self.shared.state_tx.send_replace(SyncState::idle());

        let (Some(descriptor), Some(key)) = (descriptor, key) else {
            info!(generation = slot.generation, "Query withdrawn");
            return;
        };

        let generation = slot.generation;
        self.shared.state_tx.send_replace(SyncState::loading());
        info!(identity = %key, generation, "Query activated");

        let (active, refused) = self.activate(descriptor, key, generation);
        slot.active = Some(active);
        drop(slot);

        // Emitted outside the slot lock so handlers may call back in.
        if let Some(classified) = refused {
            if self.shared.is_current(generation) {
                self.classifier.report(&classified);
            }
        }
    }

    /// Arms the refresher and spawns the driver task for `generation`
    ///
    /// A refused change subscription leaves the query `Failed` with no
    /// driver; the classified error is returned for reporting.
    fn activate(
        &self,
        descriptor: QueryDescriptor,
        key: IdentityKey,
        generation: u64,
    ) -> (ActiveQuery, Option<ClassifiedError>) {
        let armed = match descriptor.refresh() {
            RefreshStrategy::PushBased => {
                let scope = ChangeScope::for_descriptor(&descriptor, &self.schema);
                ChangeNotifier::open(self.feed.as_ref(), scope).map(|(notifier, listener)| {
                    (Refresher::Push(notifier), TriggerSource::Push(listener))
                })
            }
            RefreshStrategy::Polled(period) => {
                let (driver, ticks) = PollIntervalDriver::arm(period);
                Ok((Refresher::Polled(driver), TriggerSource::Polled(ticks)))
            }
        };

        match armed {
            Ok((refresher, triggers)) => {
                let (manual_tx, manual_rx) = mpsc::unbounded_channel();
                let driver = Driver {
                    shared: Arc::clone(&self.shared),
                    fetcher: self.fetcher.clone(),
                    classifier: self.classifier.clone(),
                    descriptor: descriptor.clone(),
                    generation,
                    triggers,
                    triggers_open: true,
                    manual: manual_rx,
                };
                let task = tokio::spawn(driver.run());

                let active = ActiveQuery {
                    key,
                    descriptor,
                    refresher: Some(refresher),
                    manual: Some(manual_tx),
                    task: Some(task),
                };
                (active, None)
            }
            Err(err) => {
                let err = err.context(format!(
                    "Failed to subscribe to changes of '{}'",
                    descriptor.source()
                ));
                let classified = self.classifier.classify(&err, Some(&descriptor));
                self.shared.state_tx.send_replace(SyncState::failed(classified.clone()));

                let active = ActiveQuery {
                    key,
                    descriptor,
                    refresher: None,
                    manual: None,
                    task: None,
                };
                (active, Some(classified))
            }
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        if let Some(mut active) = slot.active.take() {
            active.teardown();
            debug!(identity = %active.key, "Query dropped");
        }
        slot.generation += 1;
        self.shared.state_tx.send_replace(SyncState::idle());
    }
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("identity", &self.identity())
            .field("phase", &self.phase())
            .field("schema", &self.schema)
            .finish()
    }
}
