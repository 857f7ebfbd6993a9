//! Fixed-interval refresh
//!
//! The [`PollIntervalDriver`] is the timer alternative to a change
//! subscription. Arming it yields [`PollTicks`], which the live query's
//! driver task awaits on; clearing the driver cancels the ticks
//! immediately, even if a tick is already due.
//!
//! ## Timing
//!
//! The first tick fires one full period after arming (the initial fetch
//! covers time zero). When a fetch runs longer than the period, missed
//! ticks are delayed rather than fired in a burst.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owner side of an armed poll timer
#[derive(Debug)]
pub struct PollIntervalDriver {
    period: Duration,
    cancel: CancellationToken,
}

impl PollIntervalDriver {
    /// Arms a timer ticking every `period`
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(period: Duration) -> (Self, PollTicks) {
        let cancel = CancellationToken::new();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = period.as_millis() as u64, "Poll timer armed");

        let ticks = PollTicks {
            interval,
            cancel: cancel.clone(),
        };
        (Self { period, cancel }, ticks)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Clears the timer; clearing again does nothing
    pub fn clear(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!(period_ms = self.period.as_millis() as u64, "Poll timer cleared");
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PollIntervalDriver {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Tick side of an armed poll timer
#[derive(Debug)]
pub struct PollTicks {
    interval: Interval,
    cancel: CancellationToken,
}

impl PollTicks {
    /// Waits for the next tick; `None` once the driver has been cleared
    pub async fn next_tick(&mut self) -> Option<Instant> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            at = self.interval.tick() => {
                if self.cancel.is_cancelled() {
                    debug!("Discarding tick of a cleared poll timer");
                    None
                } else {
                    Some(at)
                }
            }
        }
    }
}
