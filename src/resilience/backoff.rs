//! Exponential backoff with symmetric jitter.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    current_delay: Duration,
    failure_count: u32,
}

impl ExponentialBackoff {
    /// Backoff without jitter. `max_delay` below `base_delay` is raised to it.
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            multiplier: multiplier.max(1.0),
            jitter: 0.0,
            current_delay: base_delay,
            failure_count: 0,
        }
    }

    /// Symmetric jitter fraction, clamped to `[0, 1)`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.999);
        self
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.multiplier)
            .with_jitter(config.jitter)
    }

    /// Return the current delay (jittered) and escalate for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.jittered(self.current_delay);

        let grown = Duration::try_from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay);
        // Float round-trips must never shrink the delay
        self.current_delay = grown.max(self.current_delay).min(self.max_delay);
        self.failure_count = self.failure_count.saturating_add(1);

        delay
    }

    pub fn reset(&mut self) {
        self.current_delay = self.base_delay;
        self.failure_count = 0;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(delay)
    }

    /// Delay the next failure will start from, before jitter
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
