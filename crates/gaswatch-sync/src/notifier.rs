//! Scoped change subscriptions
//!
//! A [`ChangeNotifier`] owns one open subscription on the backend's change
//! feed. Opening it yields a [`ChangeListener`], the receiving half that
//! the live query's driver task awaits on.
//!
//! ## Architecture
//!
//! ```text
//! backend writes
//!       │
//!       ▼
//!  IChangeFeed ──→ broadcast ──→ ChangeListener ──→ LiveQuery driver ──→ refetch
//!                                      ▲
//!                     ChangeNotifier ──┘ (handle; closed on teardown)
//! ```
//!
//! The two halves are split so the engine can close the subscription
//! synchronously while the listener lives inside a task. Events carry no
//! payload worth merging: any event in scope means "refetch".

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use gaswatch_core::ports::{ChangeEvent, ChangeScope, IChangeFeed, SubscriptionHandle};

/// A change relevant to a listener's scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// An event within scope arrived
    Changed(ChangeEvent),
    /// The listener fell behind and `n` events were dropped
    Lagged(u64),
}

// ============================================================================
// ChangeNotifier
// ============================================================================

/// The open side of a change subscription
#[derive(Debug)]
pub struct ChangeNotifier {
    scope: ChangeScope,
    handle: SubscriptionHandle,
}

impl ChangeNotifier {
    /// Opens a subscription for `scope`
    ///
    /// # Errors
    /// Returns the feed's error if it refuses the subscription
    pub fn open(
        feed: &dyn IChangeFeed,
        scope: ChangeScope,
    ) -> anyhow::Result<(Self, ChangeListener)> {
        let subscription = feed.subscribe(&scope)?;
        info!(scope = %scope, "Change subscription opened");

        let notifier = Self {
            scope: scope.clone(),
            handle: subscription.handle,
        };
        let listener = ChangeListener {
            scope,
            events: subscription.events,
        };
        Ok((notifier, listener))
    }

    pub fn scope(&self) -> &ChangeScope {
        &self.scope
    }

    /// Closes the subscription; closing again does nothing
    pub fn close(&mut self) {
        if self.handle.is_open() {
            self.handle.close();
            info!(scope = %self.scope, "Change subscription closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// ChangeListener
// ============================================================================

/// The receiving side of a change subscription
#[derive(Debug)]
pub struct ChangeListener {
    scope: ChangeScope,
    events: broadcast::Receiver<ChangeEvent>,
}

impl ChangeListener {
    /// Waits for the next change within scope
    ///
    /// Events outside the scope are skipped. Returns `None` once the feed
    /// has closed its channel.
    pub async fn next_change(&mut self) -> Option<ChangeSignal> {
        loop {
            match self.events.recv().await {
                Ok(event) if self.scope.matches(&event) => {
                    debug!(
                        scope = %self.scope,
                        operation = %event.operation,
                        record_id = ?event.record_id,
                        "Change event in scope"
                    );
                    return Some(ChangeSignal::Changed(event));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(scope = %self.scope, skipped, "Change listener lagged");
                    return Some(ChangeSignal::Lagged(skipped));
                }
                Err(RecvError::Closed) => {
                    info!(scope = %self.scope, "Change feed closed");
                    return None;
                }
            }
        }
    }
}
