#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Update Orchestrator
//!
//! Keeps locally stored market data fresh by pulling from slow, rate-limited and
//! intermittently offline upstream sources.
//!
//! ## Overview
//!
//! The orchestrator tracks when each `(entity, data kind)` pair was last
//! refreshed, turns staleness into a prioritized queue of work, and drains that
//! queue one batch per tick through per-upstream protection: a token bucket,
//! exponential backoff, a call deadline and a circuit breaker.
//!
//! ## Module Organization
//!
//! - [`resilience`] - token bucket, backoff, circuit breaker, upstream guards
//! - [`registry`] - freshness bookkeeping, due-lists, health reporting
//! - [`orchestration`] - scheduler loop, tasks, handlers, blackout window
//! - [`config`] - layered configuration and validation
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging bootstrap
//! - [`clock`] - wall-clock seam for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use update_orchestrator::clock::SystemClock;
//! use update_orchestrator::config::ConfigManager;
//! use update_orchestrator::orchestration::{Shutdown, UpdateScheduler};
//! use update_orchestrator::registry::{FreshnessRegistry, InMemoryUpdateStore};
//! use update_orchestrator::resilience::UpstreamManager;
//! # use update_orchestrator::orchestration::{EntityCatalog, EntityFilter};
//! # struct Catalog;
//! # #[async_trait::async_trait]
//! # impl EntityCatalog for Catalog {
//! #     async fn query_entities(&self, _: &EntityFilter) -> update_orchestrator::Result<Vec<String>> {
//! #         Ok(vec!["ACB".into()])
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let registry = Arc::new(FreshnessRegistry::from_config(
//!     config,
//!     Arc::new(InMemoryUpdateStore::new()),
//!     Arc::new(Catalog),
//!     Arc::new(SystemClock),
//! )?);
//! let upstreams = Arc::new(UpstreamManager::from_config(config));
//!
//! // Handlers map each data kind to its collector and database
//! let handlers = HashMap::new();
//! let scheduler = UpdateScheduler::from_config(config, registry, upstreams, &handlers)?;
//!
//! let shutdown = Shutdown::new();
//! scheduler.run(shutdown.signal()).await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, OrchestratorConfig};
pub use constants::{system, DataKind, HealthLabel, UpdateStatus, WorkReason};
pub use error::{OrchestratorError, Result};
pub use orchestration::{
    BatchReport, BlackoutWindow, Collector, CollectorHandler, CycleOutcome, Database,
    EntityCatalog, EntityFilter, SchedulerStatus, ScheduledTask, Shutdown, ShutdownSignal,
    TaskHandler, TaskRunStatus, UpdateScheduler,
};
pub use registry::{
    FreshnessRegistry, HealthSummary, InMemoryUpdateStore, UpdateRecord, UpdateStore, WorkItem,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitState, ExponentialBackoff, RateLimiter,
    TokenBucket, UpstreamCallError, UpstreamError, UpstreamGuard, UpstreamManager,
};
