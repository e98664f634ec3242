//! Tracker announce scheduling state.
//!
//! The announce wire exchange happens outside this crate; what lives
//! here is the cadence bookkeeping the engine consults, including the
//! minimum-interval override used to hurry the next announce when the
//! swarm has no connections.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use crate::clock::Checkpoint;

/// Announce cadence used when the tracker has not dictated one, and the
/// value the minimum interval is forced down to when peers are needed
/// urgently.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(120);

/// Tracker interaction cadence for one swarm.
///
/// Tracks the interval the tracker asked for and the minimum it permits;
/// the next announce is due once the smaller of the two has elapsed.
#[derive(Debug)]
pub struct BtAnnounce {
    interval: Cell<Duration>,
    min_interval: Cell<Duration>,
    checkpoint: RefCell<Checkpoint>,
}

impl BtAnnounce {
    /// Creates announce state with the given initial cadence.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: Cell::new(interval),
            min_interval: Cell::new(interval),
            checkpoint: RefCell::new(Checkpoint::new()),
        }
    }

    /// Interval the tracker most recently requested.
    pub fn interval(&self) -> Duration {
        self.interval.get()
    }

    /// Minimum interval currently in force.
    pub fn min_interval(&self) -> Duration {
        self.min_interval.get()
    }

    /// Adopts the cadence from a tracker response.
    ///
    /// A missing minimum falls back to the interval; a minimum above the
    /// interval is clamped down to it.
    pub fn update_intervals(&self, interval: Duration, min_interval: Option<Duration>) {
        self.interval.set(interval);
        self.min_interval
            .set(min_interval.unwrap_or(interval).min(interval));
    }

    /// Forces the minimum interval, typically down to
    /// [`DEFAULT_ANNOUNCE_INTERVAL`], so the next announce happens sooner.
    pub fn override_min_interval(&self, min_interval: Duration) {
        self.min_interval.set(min_interval);
    }

    /// True once the effective interval has elapsed since the last reset.
    pub fn announce_due(&self) -> bool {
        let wait = self.interval.get().min(self.min_interval.get());
        self.checkpoint.borrow().elapsed(wait)
    }

    /// Marks an announce as just performed.
    pub fn reset(&self) {
        self.checkpoint.borrow_mut().reset();
    }
}
