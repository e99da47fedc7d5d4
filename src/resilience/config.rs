//! Runtime settings for the resilience primitives, derived from
//! [`UpstreamConfig`](crate::config::UpstreamConfig).

use crate::config::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker thresholds and recovery timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in the closed state that open the circuit
    pub failure_threshold: u32,

    /// Wait after opening before a probe is admitted
    pub recovery_timeout: Duration,

    /// Ceiling for the recovery wait after repeated failed probes
    pub max_recovery_timeout: Duration,

    /// Probes admitted at once while half-open
    pub max_half_open_probes: u32,
}

impl CircuitBreakerConfig {
    pub fn from_upstream(config: &UpstreamConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout(),
            max_recovery_timeout: config.max_recovery_timeout(),
            max_half_open_probes: config.max_half_open_probes,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_upstream(&UpstreamConfig::default())
    }
}
