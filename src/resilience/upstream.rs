//! # Upstream Guard
//!
//! Everything that protects one external source: its rate limiter, its circuit
//! breaker and a per-call deadline. Every call to the source goes through
//! [`UpstreamGuard::call`].

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use super::config::CircuitBreakerConfig;
use super::metrics::UpstreamStatus;
use super::rate_limiter::RateLimiter;
use crate::config::UpstreamConfig;
use crate::orchestration::shutdown::ShutdownSignal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Failure reported by a collector.
///
/// Every variant counts toward backoff and the breaker threshold; whether a
/// permanent failure is resubmitted later is the collector's business.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// Network errors, 5xx responses, throttling
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed or unusable payload
    #[error("Permanent upstream failure: {0}")]
    Permanent(String),
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        UpstreamError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        UpstreamError::Permanent(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, UpstreamError::Permanent(_))
    }
}

/// Result of a guarded call that did not succeed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamCallError {
    /// Short-circuited by the breaker; no request was made
    #[error("Circuit open for upstream {upstream}")]
    CircuitOpen { upstream: String },

    /// Shutdown interrupted the call
    #[error("Upstream call cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] UpstreamError),
}

impl UpstreamCallError {
    /// Only real failed requests feed backoff; synthetic rejections and
    /// cancellations do not.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, UpstreamCallError::Failed(_))
    }
}

impl From<CircuitBreakerError<UpstreamError>> for UpstreamCallError {
    fn from(error: CircuitBreakerError<UpstreamError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => {
                UpstreamCallError::CircuitOpen { upstream: component }
            }
            CircuitBreakerError::OperationFailed(e) => UpstreamCallError::Failed(e),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamGuard {
    name: String,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    call_timeout: Duration,
}

impl UpstreamGuard {
    pub fn new(
        name: impl Into<String>,
        limiter: RateLimiter,
        breaker: CircuitBreaker,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            limiter,
            breaker,
            call_timeout,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &UpstreamConfig) -> Self {
        let name = name.into();
        Self::new(
            name.clone(),
            RateLimiter::from_config(name.clone(), config),
            CircuitBreaker::new(name, CircuitBreakerConfig::from_upstream(config)),
            config.call_timeout(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the breaker would reject a call right now without probing
    pub fn is_circuit_open(&self) -> bool {
        self.breaker.state() == CircuitState::Open
            && self
                .breaker
                .status()
                .time_until_half_open_ms
                .is_some_and(|ms| ms > 0)
    }

    /// Run `operation` against this upstream.
    ///
    /// Order: breaker admission, token acquisition, the operation under
    /// `call_timeout`. A timeout is reported as [`UpstreamError::Timeout`] and
    /// counts as a failure. Shutdown interrupts any of these waits; an interrupted
    /// call records no outcome.
    pub async fn call<F, Fut, T>(
        &self,
        shutdown: &ShutdownSignal,
        operation: F,
    ) -> Result<T, UpstreamCallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if shutdown.is_triggered() {
            return Err(UpstreamCallError::Cancelled);
        }

        let guarded = self.breaker.execute(move || async move {
            self.limiter.acquire().await;
            match timeout(self.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout(self.call_timeout)),
            }
        });

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(UpstreamCallError::Cancelled),
            result = guarded => result,
        };

        match result {
            Ok(value) => {
                self.limiter.on_success();
                Ok(value)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Sleep for the limiter's next backoff delay after a failed call.
    ///
    /// Returns the delay that was served, or `Cancelled` if shutdown cut it short.
    pub async fn backoff_after_failure(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<Duration, UpstreamCallError> {
        let delay = self.limiter.on_failure();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(UpstreamCallError::Cancelled),
            _ = sleep(delay) => {
                debug!(upstream = %self.name, delay_ms = delay.as_millis() as u64, "Backoff served");
                Ok(delay)
            }
        }
    }

    /// Simultaneous calls this upstream's bucket can absorb without queueing
    pub fn max_concurrency(&self) -> usize {
        (self.limiter.bucket().capacity().floor() as usize).max(1)
    }

    pub fn status(&self) -> UpstreamStatus {
        UpstreamStatus {
            name: self.name.clone(),
            healthy: self.breaker.is_healthy(),
            max_concurrency: self.max_concurrency(),
            call_timeout_ms: self.call_timeout.as_millis() as u64,
            circuit: self.breaker.status(),
            rate_limiter: self.limiter.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::orchestration::shutdown::Shutdown;

    fn guard() -> UpstreamGuard {
        UpstreamGuard::from_config(
            "exchange",
            &UpstreamConfig {
                requests_per_minute: 60,
                burst_capacity: Some(3),
                failure_threshold: 2,
                recovery_timeout_seconds: 60,
                call_timeout_seconds: 5,
                backoff: BackoffConfig {
                    jitter: 0.0,
                    ..BackoffConfig::default()
                },
                ..UpstreamConfig::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_value_through() {
        let guard = guard();
        let value = guard
            .call(&ShutdownSignal::never(), || async { Ok::<_, UpstreamError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(guard.status().rate_limiter.total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let guard = guard();
        let err = guard
            .call(&ShutdownSignal::never(), || async {
                sleep(Duration::from_secs(30)).await;
                Ok::<_, UpstreamError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamCallError::Failed(UpstreamError::Timeout(Duration::from_secs(5))));
        assert!(err.counts_as_failure());
        assert_eq!(guard.breaker().metrics().failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_not_a_failure() {
        let guard = guard();
        let signal = ShutdownSignal::never();
        for _ in 0..2 {
            let _ = guard
                .call(&signal, || async { Err::<(), _>(UpstreamError::transient("502")) })
                .await;
        }
        let err = guard
            .call(&signal, || async { Ok::<_, UpstreamError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamCallError::CircuitOpen { .. }));
        assert!(!err.counts_as_failure());
        assert!(guard.is_circuit_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_token_wait() {
        let guard = guard();
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        for _ in 0..3 {
            guard.call(&signal, || async { Ok::<_, UpstreamError>(()) }).await.unwrap();
        }

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.trigger();
        });
        let err = guard
            .call(&signal, || async { Ok::<_, UpstreamError>(()) })
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamCallError::Cancelled);
        assert_eq!(guard.breaker().metrics().total_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_escalates_and_is_cancellable() {
        let guard = guard();
        let signal = ShutdownSignal::never();
        assert_eq!(guard.backoff_after_failure(&signal).await.unwrap(), Duration::from_secs(1));
        assert_eq!(guard.backoff_after_failure(&signal).await.unwrap(), Duration::from_secs(2));

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let err = guard.backoff_after_failure(&shutdown.signal()).await.unwrap_err();
        assert_eq!(err, UpstreamCallError::Cancelled);
    }

    #[test]
    fn test_max_concurrency_follows_bucket_capacity() {
        assert_eq!(guard().max_concurrency(), 3);
    }
}
