//! # Orchestration
//!
//! The scheduling side of the orchestrator: which work runs, when, and through
//! which handler.
//!
//! ## Core Components
//!
//! - **UpdateScheduler**: tick loop that pulls the registry's priority queue and
//!   runs at most one batch per cycle
//! - **ScheduledTask**: a data kind bound to an upstream, cadence and runtime budget
//! - **CollectorHandler**: the standard fetch, persist, mark pipeline for one batch
//! - **BlackoutWindow**: market-hours window during which heavy kinds are deferred
//! - **Shutdown**: cooperative cancellation shared by the loop and in-flight calls
//!
//! External collaborators (collectors, databases, the entity catalog) plug in
//! through the traits in [`interfaces`].

pub mod blackout;
pub mod handlers;
pub mod interfaces;
pub mod scheduler;
pub mod shutdown;
pub mod task;

pub use blackout::BlackoutWindow;
pub use handlers::CollectorHandler;
pub use interfaces::{Collector, Database, EntityCatalog, EntityFilter};
pub use scheduler::{CycleOutcome, SchedulerState, SchedulerStatus, TaskStatus, UpdateScheduler};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use task::{
    BatchReport, ScheduledTask, TaskContext, TaskHandler, TaskRunStatus, TaskStats, WorkBatch,
};
