//! # Resilience Metrics
//!
//! Serializable snapshots of breaker and limiter state for an externally owned
//! health endpoint.

use super::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call counters for one circuit breaker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls short-circuited without reaching the upstream
    pub rejected_calls: u64,
    pub state_changes: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_state_change_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    /// Fraction of executed calls that succeeded; 1.0 before any call
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

/// Full breaker snapshot: state, counters and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub opened_at: Option<DateTime<Utc>>,
    /// Recovery wait in force for the current (or next) open period
    pub recovery_timeout_ms: u64,
    /// Remaining wait before a probe is admitted, while open
    pub time_until_half_open_ms: Option<u64>,
    pub half_open_probes: u32,
    pub max_half_open_probes: u32,
    pub success_rate: f64,
    pub metrics: CircuitBreakerMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub total_requests: u64,
    pub total_wait_time_ms: u64,
    pub total_failures: u64,
    pub current_tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub current_backoff_delay_ms: u64,
}

/// Combined view of one upstream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub healthy: bool,
    pub max_concurrency: usize,
    pub call_timeout_ms: u64,
    pub circuit: CircuitBreakerStatus,
    pub rate_limiter: RateLimiterStats,
}
