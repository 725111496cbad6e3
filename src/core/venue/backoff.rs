//! Exponential backoff with full jitter for reconnect loops.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay.
    pub base: Duration,
    /// Delay ceiling.
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

/// Full-jitter exponential backoff: each retry sleeps a uniform random
/// duration in `[0, min(cap, base * 2^attempt)]`. The counter resets on
/// any successful frame receipt.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Current attempt count.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The next sleep duration, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .config
            .base
            .saturating_mul(2_u32.saturating_pow(self.attempt.min(16)));
        let ceiling = exp.min(self.config.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jittered = rand::thread_rng().gen_range(0.0..=1.0) * ceiling.as_secs_f64();
        Duration::from_secs_f64(jittered)
    }

    /// Sleep for the next delay.
    pub async fn sleep(&mut self) {
        let delay = self.next_delay();
        debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
    }

    /// Reset after a successful frame.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            info!("Connection healthy, resetting backoff");
        }
        self.attempt = 0;
    }
}
