//! # Circuit Breaker Implementation
//!
//! Fault isolation for one unreliable upstream. Three states:
//! Closed (normal operation), Open (failing fast) and HalfOpen (probing recovery).
//!
//! All state lives behind a single lock so admission, outcome accounting and
//! transitions are serialized for every concurrent caller of the same upstream.
//!
//! ## Half-open probes
//!
//! Up to `max_half_open_probes` calls are admitted while half-open. The first
//! probe to resolve decides the transition: success closes the circuit, failure
//! reopens it and restarts the recovery timer. Probes from the same half-open
//! window that resolve later are applied to whatever state the breaker is in by
//! then. A probe that is dropped before resolving (cancelled) frees its slot.
//!
//! ## Recovery escalation
//!
//! The recovery wait comes from an internal [`ExponentialBackoff`] seeded with
//! `recovery_timeout` and capped at `max_recovery_timeout`. Each failed probe
//! escalates the next wait; closing the circuit resets it. With the cap equal
//! to the base (the default) the wait is constant.

use super::backoff::ExponentialBackoff;
use super::config::CircuitBreakerConfig;
use super::metrics::{CircuitBreakerMetrics, CircuitBreakerStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited calls allowed to test upstream health
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was never invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran and failed; the original error is preserved
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures while closed
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    recovery: ExponentialBackoff,
    /// Recovery wait for the current open period
    recovery_timeout: Duration,
    /// Probe slots in use during the current half-open window
    half_open_probes: u32,
    /// Bumped on every transition; ties a permit to the window that admitted it
    epoch: u64,
    metrics: CircuitBreakerMetrics,
}

/// Three-state circuit breaker guarding one upstream
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Admission ticket for one call
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    epoch: u64,
    resolved: bool,
}

impl Permit<'_> {
    fn resolve(mut self, success: bool, duration: Duration) {
        self.resolved = true;
        self.breaker
            .record_outcome(self.probe, self.epoch, success, duration);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe(self.epoch);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_seconds = config.recovery_timeout.as_secs(),
            max_half_open_probes = config.max_half_open_probes,
            "🛡️ Circuit breaker initialized"
        );

        let recovery =
            ExponentialBackoff::new(config.recovery_timeout, config.max_recovery_timeout, 2.0);
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                opened_at_wall: None,
                recovery_timeout: recovery.current_delay(),
                recovery,
                half_open_probes: 0,
                epoch: 0,
                metrics: CircuitBreakerMetrics::default(),
            }),
            name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state. An open circuit whose recovery wait has elapsed still reads
    /// `Open` until the next call is admitted as a probe.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Rejected calls return [`CircuitBreakerError::CircuitOpen`] without invoking
    /// `operation`. Otherwise the operation's own result is returned unchanged.
    /// Dropping the returned future before the operation resolves records nothing.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit().ok_or_else(|| CircuitBreakerError::CircuitOpen {
            component: self.name.clone(),
        })?;

        let started = Instant::now();
        let result = operation().await;
        permit.resolve(result.is_ok(), started.elapsed());

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    fn admit(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let ready = inner
                .opened_at
                .map(|opened| opened.elapsed() >= inner.recovery_timeout)
                .unwrap_or(true);
            if ready {
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }

        match inner.state {
            CircuitState::Closed => Some(Permit {
                breaker: self,
                probe: false,
                epoch: inner.epoch,
                resolved: false,
            }),
            CircuitState::HalfOpen if inner.half_open_probes < self.config.max_half_open_probes => {
                inner.half_open_probes += 1;
                debug!(
                    component = %self.name,
                    probe = inner.half_open_probes,
                    "🟡 Admitting half-open probe"
                );
                Some(Permit {
                    breaker: self,
                    probe: true,
                    epoch: inner.epoch,
                    resolved: false,
                })
            }
            _ => {
                inner.metrics.rejected_calls += 1;
                debug!(component = %self.name, state = %inner.state, "⛔ Call rejected by open circuit");
                None
            }
        }
    }

    fn release_probe(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.epoch == epoch {
            inner.half_open_probes = inner.half_open_probes.saturating_sub(1);
            debug!(component = %self.name, "Half-open probe abandoned, slot released");
        }
    }

    fn record_outcome(&self, probe: bool, epoch: u64, success: bool, duration: Duration) {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        inner.metrics.total_calls += 1;
        if success {
            inner.metrics.successful_calls += 1;
            inner.metrics.last_success_at = Some(now);
            debug!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "🟢 Operation succeeded"
            );
        } else {
            inner.metrics.failed_calls += 1;
            inner.metrics.last_failure_at = Some(now);
            warn!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "🔴 Operation failed"
            );
        }

        // First probe to resolve in its own window decides
        if probe && inner.state == CircuitState::HalfOpen && inner.epoch == epoch {
            if success {
                self.transition(&mut inner, CircuitState::Closed);
            } else {
                self.transition(&mut inner, CircuitState::Open);
            }
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.failure_count = 0;
                } else {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open);
                    }
                }
            }
            // Late results from an earlier window only update counters
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.epoch += 1;
        inner.half_open_probes = 0;
        inner.metrics.state_changes += 1;
        inner.metrics.last_state_change_at = Some(Utc::now());

        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
                inner.recovery.reset();
                inner.recovery_timeout = inner.recovery.current_delay();
                info!(
                    component = %self.name,
                    from = %from,
                    total_calls = inner.metrics.total_calls,
                    "🟢 Circuit breaker closed (recovered)"
                );
            }
            CircuitState::Open => {
                if from == CircuitState::HalfOpen {
                    inner.recovery.next_delay();
                    inner.recovery_timeout = inner.recovery.current_delay();
                }
                inner.opened_at = Some(Instant::now());
                inner.opened_at_wall = Some(Utc::now());
                error!(
                    component = %self.name,
                    from = %from,
                    consecutive_failures = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    recovery_timeout_seconds = inner.recovery_timeout.as_secs(),
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                info!(
                    component = %self.name,
                    max_probes = self.config.max_half_open_probes,
                    "🟡 Circuit breaker half-open (testing recovery)"
                );
            }
        }
    }

    /// Force circuit to open state (maintenance, known outage)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force circuit to closed state (manual recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        let time_until_half_open_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => Some(
                inner
                    .recovery_timeout
                    .saturating_sub(opened.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            opened_at: inner.opened_at_wall,
            recovery_timeout_ms: inner.recovery_timeout.as_millis() as u64,
            time_until_half_open_ms,
            half_open_probes: inner.half_open_probes,
            max_half_open_probes: self.config.max_half_open_probes,
            success_rate: inner.metrics.success_rate(),
            metrics: inner.metrics.clone(),
        }
    }

    /// Closed, and not failing most calls once there is enough traffic to tell
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            return false;
        }
        if inner.metrics.total_calls < 10 {
            return true;
        }
        inner.metrics.failure_rate() < 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, recovery_secs: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                max_recovery_timeout: Duration::from_secs(recovery_secs),
                max_half_open_probes: probes,
            },
        )
    }

    async fn fail(circuit: &CircuitBreaker) {
        let _ = circuit.execute(|| async { Err::<(), _>("boom") }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_operation() {
        let circuit = breaker(3, 60, 1);
        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.execute(|| async { Ok::<_, String>("success") }).await;
        assert_eq!(result.unwrap(), "success");

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.failed_calls, 0);
        assert!(circuit.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_original_error_is_preserved() {
        let circuit = breaker(3, 60, 1);
        let result = circuit.execute(|| async { Err::<(), _>("disk on fire") }).await;
        assert_eq!(result, Err(CircuitBreakerError::OperationFailed("disk on fire")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let circuit = breaker(3, 60, 1);
        fail(&circuit).await;
        fail(&circuit).await;
        let _ = circuit.execute(|| async { Ok::<_, &str>(()) }).await;
        fail(&circuit).await;
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.status().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_rejects_without_calling() {
        let circuit = breaker(2, 60, 1);
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let spy = Arc::clone(&calls);
        let result = circuit
            .execute(|| async move {
                spy.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(circuit.metrics().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let circuit = breaker(1, 30, 1);
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let result = circuit.execute(|| async { Ok::<_, &str>("back") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.status().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_restarts_timer() {
        let circuit = breaker(1, 30, 1);
        fail(&circuit).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        let result = circuit.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.unwrap_err().is_circuit_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(circuit.execute(|| async { Ok::<_, &str>(()) }).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_limited_probes() {
        let circuit = Arc::new(breaker(1, 10, 1));
        fail(&circuit).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_circuit = Arc::clone(&circuit);
        let probe = tokio::spawn(async move {
            probe_circuit
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        let second = circuit.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(second.unwrap_err().is_circuit_open());

        release_tx.send(()).unwrap();
        assert!(probe.await.unwrap().is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_resolved_probe_decides() {
        let circuit = Arc::new(breaker(1, 10, 2));
        fail(&circuit).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let (slow_tx, slow_rx) = tokio::sync::oneshot::channel::<()>();
        let slow_circuit = Arc::clone(&circuit);
        let slow = tokio::spawn(async move {
            slow_circuit
                .execute(|| async move {
                    let _ = slow_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        // Second probe fails first and reopens the circuit
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        // Late success from the same window does not close it
        slow_tx.send(()).unwrap();
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.metrics().successful_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let circuit = breaker(1, 10, 1);
        fail(&circuit).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let hung = tokio::time::timeout(
            Duration::from_secs(1),
            circuit.execute(|| std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert_eq!(circuit.status().half_open_probes, 0);

        assert!(circuit.execute(|| async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_wait_escalates_to_cap() {
        let circuit = CircuitBreaker::new(
            "escalating",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(10),
                max_recovery_timeout: Duration::from_secs(25),
                max_half_open_probes: 1,
            },
        );
        fail(&circuit).await;
        assert_eq!(circuit.status().recovery_timeout_ms, 10_000);

        tokio::time::advance(Duration::from_secs(10)).await;
        fail(&circuit).await;
        assert_eq!(circuit.status().recovery_timeout_ms, 20_000);

        tokio::time::advance(Duration::from_secs(20)).await;
        fail(&circuit).await;
        assert_eq!(circuit.status().recovery_timeout_ms, 25_000);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(circuit.execute(|| async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(circuit.status().recovery_timeout_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_open_and_closed() {
        let circuit = breaker(5, 60, 1);
        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_healthy());
        assert!(circuit.status().time_until_half_open_ms.is_some());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().state_changes, 2);
    }
}
