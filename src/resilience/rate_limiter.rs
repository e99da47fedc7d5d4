//! # Rate Limiter
//!
//! Per-upstream request budget: a [`TokenBucket`] for issuance plus an
//! [`ExponentialBackoff`] that escalates the pause after consecutive failures.

use super::backoff::ExponentialBackoff;
use super::metrics::RateLimiterStats;
use super::token_bucket::TokenBucket;
use crate::config::UpstreamConfig;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LimiterCounters {
    total_requests: u64,
    total_wait_time: Duration,
    total_failures: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    bucket: TokenBucket,
    backoff: Mutex<ExponentialBackoff>,
    counters: Mutex<LimiterCounters>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, bucket: TokenBucket, backoff: ExponentialBackoff) -> Self {
        Self {
            name: name.into(),
            bucket,
            backoff: Mutex::new(backoff),
            counters: Mutex::new(LimiterCounters::default()),
        }
    }

    /// Limiter sized from `requests_per_minute` / `burst_capacity`
    pub fn from_config(name: impl Into<String>, config: &UpstreamConfig) -> Self {
        Self::new(
            name,
            TokenBucket::new(config.capacity(), config.refill_rate()),
            ExponentialBackoff::from_config(&config.backoff),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Wait for one request token; returns the time spent waiting
    pub async fn acquire(&self) -> Duration {
        let waited = self.bucket.acquire(1.0).await;

        let mut counters = self.counters.lock();
        counters.total_requests += 1;
        counters.total_wait_time += waited;
        drop(counters);

        if !waited.is_zero() {
            debug!(
                upstream = %self.name,
                wait_ms = waited.as_millis() as u64,
                "⏳ Rate limited request released"
            );
        }
        waited
    }

    pub fn on_success(&self) {
        self.backoff.lock().reset();
    }

    /// Record a failed request and return how long to back off before the next one
    pub fn on_failure(&self) -> Duration {
        let (delay, failures) = {
            let mut backoff = self.backoff.lock();
            let delay = backoff.next_delay();
            (delay, backoff.failure_count())
        };
        self.counters.lock().total_failures += 1;

        warn!(
            upstream = %self.name,
            consecutive_failures = failures,
            backoff_ms = delay.as_millis() as u64,
            "⚠️ Upstream failure, backing off"
        );
        delay
    }

    pub fn stats(&self) -> RateLimiterStats {
        let (failure_count, current_backoff) = {
            let backoff = self.backoff.lock();
            (backoff.failure_count(), backoff.current_delay())
        };
        let counters = self.counters.lock();
        RateLimiterStats {
            name: self.name.clone(),
            total_requests: counters.total_requests,
            total_wait_time_ms: counters.total_wait_time.as_millis() as u64,
            total_failures: counters.total_failures,
            current_tokens: self.bucket.available_tokens(),
            capacity: self.bucket.capacity(),
            refill_rate: self.bucket.refill_rate(),
            failure_count,
            current_backoff_delay_ms: current_backoff.as_millis() as u64,
        }
    }
}
