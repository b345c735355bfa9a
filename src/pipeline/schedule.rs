//! Fixed-interval scheduling for rate-limited model calls.
//!
//! The figure model is called one image at a time, and consecutive calls
//! must start at least `interval` apart. [`IntervalScheduler`] owns that
//! policy so it can be tested with a paused clock, independent of any
//! model call.

use tokio::time::{sleep_until, Duration, Instant};

/// Hands out call slots no closer together than a fixed interval.
///
/// The first slot is granted immediately. Each later slot is granted at
/// `previous grant + interval`, or immediately if that moment has passed
/// (a slow call already used up the spacing).
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl IntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time a call made right now would have to wait.
    pub fn pending_delay(&self) -> Duration {
        self.next_slot
            .map(|slot| slot.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Wait for the next slot and reserve the one after it.
    pub async fn acquire(&mut self) {
        if let Some(slot) = self.next_slot {
            sleep_until(slot).await;
        }
        self.next_slot = Some(Instant::now() + self.interval);
    }
}
