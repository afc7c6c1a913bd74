/*!
 * Outbound call pacing.
 *
 * A single `Pacer` is shared by every lookup of a run. Each outbound call
 * reserves the next free slot; slots are spaced by at least the configured
 * per-call pause, regardless of how many workers are running.
 */

use log::trace;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::app_config::PerformanceConfig;
use crate::errors::Cancelled;

/// Global rate limiter for outbound calls
#[derive(Debug)]
pub struct Pacer {
    /// Minimum spacing between two call starts
    per_call: Duration,

    /// Pause applied between two batches
    per_batch: Duration,

    /// Earliest instant the next call may start
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(per_call: Duration, per_batch: Duration) -> Self {
        Self {
            per_call,
            per_batch,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_config(config: &PerformanceConfig) -> Self {
        Self::new(config.pause_per_api_call(), config.pause_between_batches())
    }

    /// A pacer that never waits
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn per_call(&self) -> Duration {
        self.per_call
    }

    pub fn per_batch(&self) -> Duration {
        self.per_batch
    }

    /// Reserve the next call slot and return its start instant.
    ///
    /// Reservations are handed out in increasing order, each at least
    /// `per_call` after the previous one.
    fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        let slot = match *next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        *next_slot = Some(slot + self.per_call);
        slot
    }

    /// Wait until this caller may issue its call.
    ///
    /// Returns `Err(Cancelled)` without waiting further when the token fires.
    /// A cancelled caller keeps its reserved slot, which only delays later
    /// callers and never shortens the spacing.
    pub async fn wait_for_slot(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if self.per_call.is_zero() {
            return Ok(());
        }

        let slot = self.reserve();
        if slot <= Instant::now() {
            return Ok(());
        }

        trace!("Waiting {:?} for the next call slot", slot - Instant::now());
        tokio::select! {
            _ = sleep_until(slot) => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    /// Sleep the inter-batch pause, interruptible by cancellation
    pub async fn pause_between_batches(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        cancellable_sleep(self.per_batch, cancel).await
    }
}

/// Sleep for `duration` unless the token fires first
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Cancelled),
    }
}
