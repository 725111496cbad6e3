//! Rolling latency statistics for the detection path.
//!
//! Tracks ingestion lag (frame receipt to worker pickup) and processing
//! lag (worker time per update) over a bounded window and derives p99
//! values. A sustained p99 above the bound raises a latency alert.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

const WINDOW: usize = 4096;

#[derive(Debug, Default)]
struct Samples {
    values: VecDeque<f64>,
}

impl Samples {
    fn push(&mut self, value: f64) {
        if self.values.len() >= WINDOW {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(rank).copied()
    }
}

/// Shared latency tracker.
pub struct LatencyTracker {
    ingestion_ms: Mutex<Samples>,
    processing_ms: Mutex<Samples>,
    breach_since: Mutex<Option<Instant>>,
}

impl LatencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ingestion_ms: Mutex::new(Samples::default()),
            processing_ms: Mutex::new(Samples::default()),
            breach_since: Mutex::new(None),
        }
    }

    /// Record frame-receipt-to-pickup lag.
    pub fn record_ingestion(&self, lag: Duration) {
        self.ingestion_ms.lock().push(lag.as_secs_f64() * 1000.0);
    }

    /// Record per-update worker time.
    pub fn record_processing(&self, lag: Duration) {
        self.processing_ms.lock().push(lag.as_secs_f64() * 1000.0);
    }

    /// p99 ingestion lag in milliseconds.
    #[must_use]
    pub fn ingestion_p99_ms(&self) -> Option<f64> {
        self.ingestion_ms.lock().percentile(0.99)
    }

    /// p99 processing lag in milliseconds.
    #[must_use]
    pub fn processing_p99_ms(&self) -> Option<f64> {
        self.processing_ms.lock().percentile(0.99)
    }

    /// Check the end-to-end latency contract: fires when the combined p99
    /// stays above `bound_ms` for longer than `sustain`.
    ///
    /// Returns the offending p99 when the alert fires.
    pub fn check_alert(&self, bound_ms: f64, sustain: Duration) -> Option<f64> {
        let p99 = self.ingestion_p99_ms().unwrap_or(0.0) + self.processing_p99_ms().unwrap_or(0.0);
        let mut breach = self.breach_since.lock();
        if p99 > bound_ms {
            let since = breach.get_or_insert_with(Instant::now);
            if since.elapsed() >= sustain {
                warn!(p99_ms = p99, bound_ms, "detection latency exceeded");
                return Some(p99);
            }
        } else {
            *breach = None;
        }
        None
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let tracker = LatencyTracker::new();
        for i in 1..=100 {
            tracker.record_ingestion(Duration::from_millis(i));
        }
        let p99 = tracker.ingestion_p99_ms().unwrap();
        assert!(p99 >= 98.0 && p99 <= 100.0, "p99 was {p99}");
    }

    #[test]
    fn no_samples_means_no_percentile() {
        let tracker = LatencyTracker::new();
        assert!(tracker.processing_p99_ms().is_none());
    }

    #[test]
    fn alert_requires_sustained_breach() {
        let tracker = LatencyTracker::new();
        tracker.record_ingestion(Duration::from_millis(500));

        // First observation starts the clock but does not fire.
        assert!(tracker.check_alert(100.0, Duration::from_millis(50)).is_none());
        std::thread::sleep(Duration::from_millis(60));
        assert!(tracker.check_alert(100.0, Duration::from_millis(50)).is_some());
    }

    #[test]
    fn recovery_resets_the_breach_clock() {
        let tracker = LatencyTracker::new();
        tracker.record_ingestion(Duration::from_millis(500));
        assert!(tracker.check_alert(100.0, Duration::from_millis(50)).is_none());

        // Latency falls back under the bound: clock resets.
        for _ in 0..WINDOW {
            tracker.record_ingestion(Duration::from_millis(1));
        }
        assert!(tracker.check_alert(100.0, Duration::from_millis(50)).is_none());
        std::thread::sleep(Duration::from_millis(60));
        assert!(tracker.check_alert(100.0, Duration::from_millis(50)).is_none());
    }
}
