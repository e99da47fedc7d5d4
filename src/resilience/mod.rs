//! # Resilience Module
//!
//! Protection for calls to slow, rate-limited and intermittently offline
//! upstream sources.
//!
//! ## Architecture
//!
//! - **Token bucket**: lazy-refill request budget with FIFO waiters
//! - **Backoff**: exponential delay with jitter after consecutive failures
//! - **Circuit breaker**: Closed / Open / HalfOpen guard with escalating recovery
//! - **Upstream guard**: limiter + breaker + call deadline for one source
//! - **Manager**: one guard per configured source, health reporting
//!
//! ## Usage
//!
//! ```rust,no_run
//! use update_orchestrator::config::UpstreamConfig;
//! use update_orchestrator::orchestration::shutdown::Shutdown;
//! use update_orchestrator::resilience::{UpstreamError, UpstreamGuard};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = UpstreamGuard::from_config("exchange", &UpstreamConfig::default());
//! let shutdown = Shutdown::new();
//!
//! let quote = guard
//!     .call(&shutdown.signal(), || async {
//!         // HTTP request here
//!         Ok::<_, UpstreamError>(42.0)
//!     })
//!     .await?;
//! # let _ = quote;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;
pub mod token_bucket;
pub mod upstream;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::UpstreamManager;
pub use metrics::{CircuitBreakerMetrics, CircuitBreakerStatus, RateLimiterStats, UpstreamStatus};
pub use rate_limiter::RateLimiter;
pub use token_bucket::{TokenBucket, TokenBucketSnapshot};
pub use upstream::{UpstreamCallError, UpstreamError, UpstreamGuard};
