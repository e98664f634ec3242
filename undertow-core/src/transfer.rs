//! Byte accounting and on-demand speed computation.
//!
//! Speeds are derived from recent byte samples over a sliding window
//! rather than kept as continuously updated counters, so an idle
//! transfer naturally decays to zero.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which recent samples contribute to the computed speed.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Point-in-time transfer statistics for one download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStat {
    /// Current download speed in bytes per second
    pub download_speed: u64,
    /// Current upload speed in bytes per second
    pub upload_speed: u64,
    /// Bytes downloaded since the counter was created
    pub session_download_length: u64,
    /// Bytes uploaded since the counter was created
    pub session_upload_length: u64,
}

/// Sliding-window byte counter for one direction of a transfer.
#[derive(Debug, Clone, Default)]
struct RateWindow {
    samples: VecDeque<(Instant, u64)>,
    total: u64,
}

impl RateWindow {
    fn record(&mut self, bytes: u64) {
        self.total += bytes;
        self.samples.push_back((Instant::now(), bytes));
    }

    fn speed(&mut self) -> u64 {
        // Instant underflows near process start on some platforms
        if let Some(cutoff) = Instant::now().checked_sub(SPEED_WINDOW) {
            while let Some(&(at, _)) = self.samples.front() {
                if at >= cutoff {
                    break;
                }
                self.samples.pop_front();
            }
        }
        let windowed: u64 = self.samples.iter().map(|&(_, bytes)| bytes).sum();
        windowed / SPEED_WINDOW.as_secs()
    }
}

/// Records transferred bytes and computes `TransferStat` snapshots.
///
/// One counter exists per request group; peer-exchange and HTTP commands
/// both feed it as bytes move.
#[derive(Debug, Clone, Default)]
pub struct TransferCounter {
    down: RateWindow,
    up: RateWindow,
}

impl TransferCounter {
    /// Creates an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records downloaded bytes.
    pub fn record_download(&mut self, bytes: u64) {
        self.down.record(bytes);
    }

    /// Records uploaded bytes.
    pub fn record_upload(&mut self, bytes: u64) {
        self.up.record(bytes);
    }

    /// Total bytes downloaded since creation.
    pub fn session_download_length(&self) -> u64 {
        self.down.total
    }

    /// Total bytes uploaded since creation.
    pub fn session_upload_length(&self) -> u64 {
        self.up.total
    }

    /// Computes a snapshot of current speeds and session totals.
    pub fn stat(&mut self) -> TransferStat {
        TransferStat {
            download_speed: self.down.speed(),
            upload_speed: self.up.speed(),
            session_download_length: self.down.total,
            session_upload_length: self.up.total,
        }
    }
}
