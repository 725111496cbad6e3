//! Bounded fan-in queue between venue clients and detector workers.
//!
//! Freshness wins over completeness: when the queue is full, the producer
//! evicts the oldest queued update for the same `(venue, market)` key, or
//! the oldest entry overall when no same-key entry exists. The drop counter
//! feeds the `bus_overflow` alert when detectors fall behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::core::domain::MarketUpdate;

/// Multi-producer multi-consumer update bus.
pub struct UpdateBus {
    queue: Mutex<VecDeque<MarketUpdate>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    published: AtomicU64,
}

impl UpdateBus {
    /// Create a bus holding at most `capacity` pending updates.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    /// Publish an update, evicting on overflow.
    pub fn publish(&self, update: MarketUpdate) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                let key = update.key();
                let evict_at = queue
                    .iter()
                    .position(|queued| queued.key() == key)
                    .unwrap_or(0);
                queue.remove(evict_at);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(update);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Receive the next update, waiting if the queue is empty.
    pub async fn recv(&self) -> MarketUpdate {
        loop {
            if let Some(update) = self.try_recv() {
                return update;
            }
            self.notify.notified().await;
        }
    }

    /// Receive without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<MarketUpdate> {
        let update = self.queue.lock().pop_front();
        if update.is_some() {
            // Another consumer may still have work queued behind this one.
            self.notify.notify_one();
        }
        update
    }

    /// Drain whatever is queued within `deadline` (used at shutdown).
    pub async fn drain(&self, deadline: Duration) -> Vec<MarketUpdate> {
        let started = Instant::now();
        let mut drained = Vec::new();
        while started.elapsed() < deadline {
            match self.try_recv() {
                Some(update) => drained.push(update),
                None => break,
            }
        }
        drained
    }

    /// Pending updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total updates dropped to make room.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total updates accepted.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Watches a bus's drop counter and raises a critical alert when the drop
/// rate crosses `threshold_per_sec`, meaning detection is effectively stale.
pub struct OverflowAlarm {
    threshold_per_sec: f64,
    last_dropped: u64,
    last_checked: Instant,
}

impl OverflowAlarm {
    #[must_use]
    pub fn new(threshold_per_sec: f64) -> Self {
        Self {
            threshold_per_sec,
            last_dropped: 0,
            last_checked: Instant::now(),
        }
    }

    /// Sample the bus; returns the current drop rate when it exceeds the
    /// threshold.
    pub fn check(&mut self, bus: &UpdateBus) -> Option<f64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_checked).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let dropped = bus.dropped();
        let rate = (dropped - self.last_dropped) as f64 / elapsed;
        self.last_dropped = dropped;
        self.last_checked = now;

        if rate > self.threshold_per_sec {
            warn!(rate, "bus_overflow: detectors are lagging, data is stale");
            Some(rate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{MarketId, Venue};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn update(market: &str, seq: u64) -> MarketUpdate {
        MarketUpdate::new(
            Venue::Polymarket,
            MarketId::from(market),
            dec!(0.44),
            dec!(0.46),
            dec!(10),
            dec!(10),
            Decimal::ZERO,
            seq,
        )
    }

    #[tokio::test]
    async fn publish_and_recv_in_order() {
        let bus = UpdateBus::new(8);
        bus.publish(update("a", 1));
        bus.publish(update("b", 1));

        assert_eq!(bus.recv().await.market_id().as_str(), "a");
        assert_eq!(bus.recv().await.market_id().as_str(), "b");
        assert!(bus.is_empty());
        assert_eq!(bus.published(), 2);
        assert_eq!(bus.dropped(), 0);
    }

    #[test]
    fn overflow_evicts_same_key_first() {
        let bus = UpdateBus::new(2);
        bus.publish(update("a", 1));
        bus.publish(update("b", 1));
        // Full. The stale "a" entry is evicted, not "b".
        bus.publish(update("a", 2));

        assert_eq!(bus.dropped(), 1);
        let first = bus.try_recv().unwrap();
        let second = bus.try_recv().unwrap();
        assert_eq!(first.market_id().as_str(), "b");
        assert_eq!(second.market_id().as_str(), "a");
        assert_eq!(second.sequence(), 2);
    }

    #[test]
    fn overflow_without_same_key_evicts_oldest() {
        let bus = UpdateBus::new(2);
        bus.publish(update("a", 1));
        bus.publish(update("b", 1));
        bus.publish(update("c", 1));

        assert_eq!(bus.dropped(), 1);
        assert_eq!(bus.try_recv().unwrap().market_id().as_str(), "b");
        assert_eq!(bus.try_recv().unwrap().market_id().as_str(), "c");
    }

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let bus = UpdateBus::new(8);
        for i in 0..5 {
            bus.publish(update("m", i));
        }
        let drained = bus.drain(Duration::from_secs(1)).await;
        assert_eq!(drained.len(), 5);
        assert!(bus.is_empty());
    }

    #[test]
    fn overflow_alarm_fires_on_high_drop_rate() {
        let bus = UpdateBus::new(1);
        let mut alarm = OverflowAlarm::new(0.0);
        // Force drops.
        bus.publish(update("a", 1));
        bus.publish(update("a", 2));
        std::thread::sleep(Duration::from_millis(10));
        assert!(alarm.check(&bus).is_some());
        // No further drops: below threshold on the next sample.
        std::thread::sleep(Duration::from_millis(10));
        assert!(alarm.check(&bus).is_none());
    }

    #[tokio::test]
    async fn multiple_consumers_split_the_stream() {
        use std::sync::Arc;
        let bus = Arc::new(UpdateBus::new(64));
        for i in 0..10 {
            bus.publish(update("m", i));
        }
        let a = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let mut n = 0;
                while bus.try_recv().is_some() {
                    n += 1;
                }
                n
            })
        };
        let b = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let mut n = 0;
                while bus.try_recv().is_some() {
                    n += 1;
                }
                n
            })
        };
        let total = a.await.unwrap() + b.await.unwrap();
        assert_eq!(total, 10);
    }
}
