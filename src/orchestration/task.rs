//! # Scheduled Tasks
//!
//! A task binds one data kind to an upstream, a cadence, a runtime budget and a
//! [`TaskHandler`] that does the fetch and persist work for one batch.

use crate::clock::Clock;
use crate::config::TaskConfig;
use crate::constants::DataKind;
use crate::error::Result;
use crate::orchestration::shutdown::ShutdownSignal;
use crate::registry::{FreshnessRegistry, WorkItem};
use crate::resilience::UpstreamGuard;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of one task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Completed,
    Failed,
    /// Exceeded `max_runtime`
    TimedOut,
    /// Interrupted by shutdown
    Cancelled,
    /// Task disabled; nothing ran
    Skipped,
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::TimedOut => "timed_out",
            TaskRunStatus::Cancelled => "cancelled",
            TaskRunStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Run counters for one task.
///
/// `success_count`, `failure_count` and `cancelled_count` partition
/// `run_count`. A timed-out run is a failure and is also tallied in
/// `timeout_count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub cancelled_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<TaskRunStatus>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub items_processed: u64,
}

/// Per-item tallies for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Short-circuited by an open breaker
    pub rejected: usize,
    pub cancelled: usize,
    pub records_written: usize,
}

impl BatchReport {
    /// Nothing succeeded while something failed or was rejected
    pub fn is_failure(&self) -> bool {
        self.succeeded == 0 && self.failed + self.rejected > 0
    }

    /// Items that reached the upstream and got an answer
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Work handed to a handler for one execution
#[derive(Debug, Clone)]
pub struct WorkBatch {
    pub run_id: Uuid,
    pub task_name: String,
    pub data_kind: DataKind,
    /// The whole kind is one all-or-nothing item
    pub bulk: bool,
    pub items: Vec<WorkItem>,
}

/// Shared collaborators available to a handler during one execution
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub registry: Arc<FreshnessRegistry>,
    pub upstream: Arc<UpstreamGuard>,
    pub shutdown: ShutdownSignal,
    /// Upper bound on simultaneous items; further capped by the upstream's bucket
    pub worker_concurrency: usize,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process a batch. Per-item failures belong in the report; an `Err` means
    /// the batch as a whole could not run.
    async fn handle(&self, batch: WorkBatch, ctx: &TaskContext) -> Result<BatchReport>;
}

pub struct ScheduledTask {
    config: TaskConfig,
    handler: Arc<dyn TaskHandler>,
    enabled: AtomicBool,
    stats: Mutex<TaskStats>,
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    pub fn new(config: TaskConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            handler,
            enabled: AtomicBool::new(enabled),
            stats: Mutex::new(TaskStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn data_kind(&self) -> DataKind {
        self.config.data_kind
    }

    pub fn upstream(&self) -> &str {
        &self.config.upstream
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn TaskHandler> {
        &self.handler
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn max_runtime(&self) -> Duration {
        self.config.max_runtime()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the cadence since the last run has elapsed at `now`
    pub fn cadence_elapsed(&self, now: DateTime<Utc>) -> bool {
        let cadence = ChronoDuration::from_std(self.config.cadence()).unwrap_or(ChronoDuration::MAX);
        match self.stats.lock().last_run {
            None => true,
            Some(last) => now - last >= cadence,
        }
    }

    pub fn stats(&self) -> TaskStats {
        self.stats.lock().clone()
    }

    pub(crate) fn mark_started(&self, clock: &dyn Clock) {
        self.stats.lock().last_run = Some(clock.now());
    }

    pub(crate) fn record_run(
        &self,
        status: TaskRunStatus,
        duration: Duration,
        items_processed: usize,
        error: Option<String>,
    ) {
        let mut stats = self.stats.lock();
        stats.run_count += 1;
        match status {
            TaskRunStatus::Completed => stats.success_count += 1,
            TaskRunStatus::Failed => stats.failure_count += 1,
            TaskRunStatus::TimedOut => {
                stats.failure_count += 1;
                stats.timeout_count += 1;
            }
            TaskRunStatus::Cancelled => stats.cancelled_count += 1,
            TaskRunStatus::Skipped => {}
        }
        stats.last_status = Some(status);
        stats.last_error = error;
        stats.last_duration_ms = Some(duration.as_millis() as u64);
        stats.items_processed += items_processed as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _batch: WorkBatch, _ctx: &TaskContext) -> Result<BatchReport> {
            Ok(BatchReport::default())
        }
    }

    #[test]
    fn test_batch_failure_classification() {
        let all_failed = BatchReport {
            failed: 3,
            ..Default::default()
        };
        assert!(all_failed.is_failure());

        let all_rejected = BatchReport {
            rejected: 2,
            ..Default::default()
        };
        assert!(all_rejected.is_failure());

        let partial = BatchReport {
            succeeded: 1,
            failed: 4,
            ..Default::default()
        };
        assert!(!partial.is_failure());
        assert!(!BatchReport::default().is_failure());
    }

    #[test]
    fn test_cadence_and_stats() {
        let mut config = TaskConfig::new("price_refresh", DataKind::Price);
        config.cadence_seconds = 3600;
        let task = ScheduledTask::new(config, Arc::new(NoopHandler));
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());

        assert!(task.cadence_elapsed(clock.now()));
        task.mark_started(&clock);
        task.record_run(TaskRunStatus::Completed, Duration::from_millis(250), 7, None);
        assert!(!task.cadence_elapsed(clock.now() + ChronoDuration::minutes(59)));
        assert!(task.cadence_elapsed(clock.now() + ChronoDuration::minutes(60)));

        task.record_run(TaskRunStatus::TimedOut, Duration::from_secs(2), 0, Some("overran".into()));
        let stats = task.stats();
        assert_eq!(stats.run_count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.items_processed, 7);
        assert_eq!(stats.last_status, Some(TaskRunStatus::TimedOut));
        assert_eq!(stats.last_duration_ms, Some(2_000));
    }

    #[test]
    fn test_outcome_counters_partition_run_count() {
        let task = ScheduledTask::new(TaskConfig::new("price_refresh", DataKind::Price), Arc::new(NoopHandler));
        for status in [
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
            TaskRunStatus::TimedOut,
            TaskRunStatus::TimedOut,
            TaskRunStatus::Cancelled,
        ] {
            task.record_run(status, Duration::from_secs(1), 0, None);
        }

        let stats = task.stats();
        assert_eq!(stats.run_count, 5);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 3);
        assert_eq!(stats.timeout_count, 2);
        assert_eq!(stats.cancelled_count, 1);
        assert_eq!(
            stats.run_count,
            stats.success_count + stats.failure_count + stats.cancelled_count
        );
    }

    #[test]
    fn test_enable_toggle() {
        let task = ScheduledTask::new(TaskConfig::new("t", DataKind::Price), Arc::new(NoopHandler));
        assert!(task.is_enabled());
        task.set_enabled(false);
        assert!(!task.is_enabled());
    }
}
