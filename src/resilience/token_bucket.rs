//! # Token Bucket
//!
//! Smooths outbound request issuance to one upstream source.
//!
//! Refill is computed lazily whenever the bucket is touched:
//! `tokens = min(capacity, tokens + elapsed * refill_rate)`. There is no
//! background timer. Waiting callers queue on an async mutex that is held while
//! they sleep, so callers are served in arrival order and nobody can bypass a
//! waiter by racing for freshly refilled tokens.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Floor for a single refill wait; keeps the loop from spinning on rounding error
const MIN_REFILL_WAIT: Duration = Duration::from_millis(1);

/// Slack for float comparisons of token counts
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketSnapshot {
    pub capacity: f64,
    pub refill_rate: f64,
    pub tokens: f64,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
    /// Held by the caller currently waiting for tokens
    queue: AsyncMutex<()>,
}

impl TokenBucket {
    /// Create a full bucket. `refill_rate` is in tokens per second.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            capacity,
            refill_rate: refill_rate.max(f64::EPSILON),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            queue: AsyncMutex::new(()),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        // A clock that moved backwards contributes nothing
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    fn wait_for(&self, deficit: f64) -> Duration {
        Duration::try_from_secs_f64(deficit / self.refill_rate)
            .unwrap_or(Duration::MAX)
            .max(MIN_REFILL_WAIT)
    }

    /// Wait until `n` tokens are available, consume them and return the time spent waiting.
    ///
    /// Requests up to `capacity` consume nothing until the full amount is present,
    /// so dropping the future mid-wait leaves the bucket untouched. Larger requests
    /// drain the bucket across several refill cycles instead of being rejected;
    /// tokens drained before a cancellation are not returned.
    pub async fn acquire(&self, n: f64) -> Duration {
        let started = Instant::now();
        let _turn = self.queue.lock().await;
        let mut remaining = n.max(0.0);

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);

                if remaining <= self.capacity {
                    if state.tokens + TOKEN_EPSILON >= remaining {
                        state.tokens = (state.tokens - remaining).max(0.0);
                        break;
                    }
                    self.wait_for(remaining - state.tokens)
                } else {
                    remaining -= state.tokens;
                    state.tokens = 0.0;
                    self.wait_for(remaining.min(self.capacity))
                }
            };

            debug!(
                requested = n,
                remaining = remaining,
                wait_ms = wait.as_millis() as u64,
                "⏳ Waiting for rate limit tokens"
            );
            sleep(wait).await;
        }

        started.elapsed()
    }

    /// Consume `n` tokens if they are available right now.
    ///
    /// Returns `false` without consuming anything when tokens are short or another
    /// caller is already queued for them.
    pub fn try_acquire(&self, n: f64) -> bool {
        let Ok(_turn) = self.queue.try_lock() else {
            return false;
        };
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens + TOKEN_EPSILON >= n {
            state.tokens = (state.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    /// Tokens available right now, after applying any pending refill
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    pub fn snapshot(&self) -> TokenBucketSnapshot {
        TokenBucketSnapshot {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            tokens: self.available_tokens(),
        }
    }
}
