use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff with jitter. Retries are unbounded; the caller stops
/// asking when it gives up.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Next delay, somewhere in the upper half of `base * 2^attempts`
    /// (capped at `max`).
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempts.min(16);
        let ceiling = self
            .config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.max)
            .min(self.config.max);

        self.attempts = self.attempts.saturating_add(1);

        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        ceiling.mul_f64(jitter)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
