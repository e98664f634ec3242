//! Monotonic time checkpoints for periodic commands.

use std::time::{Duration, Instant};

/// Monotonic checkpoint used by periodic commands to gate their ticks.
///
/// A checkpoint remembers when it was last reset; `elapsed` reports
/// whether at least the given interval has passed since then.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    last: Instant,
}

impl Checkpoint {
    /// Creates a checkpoint anchored at the current instant.
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Returns true if at least `interval` has passed since the last reset.
    pub fn elapsed(&self, interval: Duration) -> bool {
        self.last.elapsed() >= interval
    }

    /// Re-anchors the checkpoint at the current instant.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}
