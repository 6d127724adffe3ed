//! Inbound bandwidth measurement.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Width of the measurement window.
pub const DEFAULT_BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window byte rate.
///
/// Samples older than the window are dropped on every call, so memory stays
/// bounded by the number of arrivals per window.
#[derive(Debug)]
pub struct BandwidthMeter {
    window: Duration,
    samples: VecDeque<(Instant, usize)>,
    in_window: usize,
    total: u64,
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new(DEFAULT_BANDWIDTH_WINDOW)
    }
}

impl BandwidthMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            samples: VecDeque::new(),
            in_window: 0,
            total: 0,
        }
    }

    /// Record `bytes` arriving at `now`.
    pub fn record(&mut self, bytes: usize, now: Instant) {
        self.expire(now);
        self.samples.push_back((now, bytes));
        self.in_window += bytes;
        self.total += bytes as u64;
    }

    /// Bytes per second over the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.expire(now);
        self.in_window as f64 / self.window.as_secs_f64()
    }

    /// Bytes recorded since creation.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.saturating_duration_since(at) < self.window {
                break;
            }
            self.samples.pop_front();
            self.in_window -= bytes;
        }
    }
}
