//! # Freshness Registry Module
//!
//! Tracks when each `(entity, data kind)` pair was last refreshed and turns that
//! into prioritized work for the scheduler.
//!
//! - [`FreshnessRegistry`] - due-lists, priority queue, health reporting
//! - [`UpdateStore`] - per-record atomic storage seam
//! - [`InMemoryUpdateStore`] - process-local store
//! - `PgUpdateStore` - PostgreSQL store (feature `postgres`)

pub mod freshness;
#[cfg(feature = "postgres")]
pub mod pg_store;
pub mod store;
pub mod types;

pub use freshness::FreshnessRegistry;
#[cfg(feature = "postgres")]
pub use pg_store::PgUpdateStore;
pub use store::{InMemoryUpdateStore, UpdateStore};
pub use types::{
    HealthSummary, KindHealth, Recommendation, RecommendationKind, RecommendationPriority,
    StartupReport, UpdateOutcome, UpdateRecord, WorkItem,
};
