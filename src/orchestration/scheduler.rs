//! # Update Scheduler
//!
//! The coordinator loop. On every tick it asks the freshness registry for the
//! highest-priority outstanding work, runs at most one batch through the owning
//! task's handler, and sleeps until the next tick.
//!
//! ## Loop states
//!
//! `Idle -> Checking -> Running(task) -> Idle`, with `Cancelled` reachable from
//! any state through the shutdown signal.
//!
//! ## Task selection
//!
//! The first queued item whose kind has an eligible task (enabled, cadence
//! elapsed, not withheld by the blackout window) selects that task. Its batch is
//! the queued items of that kind, capped at the task's `batch_size`.

use super::blackout::BlackoutWindow;
use super::shutdown::ShutdownSignal;
use super::task::{BatchReport, ScheduledTask, TaskContext, TaskHandler, TaskRunStatus, TaskStats, WorkBatch};
use crate::clock::Clock;
use crate::config::{OrchestratorConfig, SchedulerConfig, TaskConfig};
use crate::constants::DataKind;
use crate::error::{OrchestratorError, Result};
use crate::registry::{FreshnessRegistry, HealthSummary, WorkItem};
use crate::resilience::{UpstreamManager, UpstreamStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Checking,
    Running { task: String },
    Cancelled,
}

/// What one call to [`UpdateScheduler::run_update_cycle`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing due, or nothing due had an eligible task
    Idle,
    Executed {
        task: String,
        status: TaskRunStatus,
        items: usize,
    },
    /// The cycle could not be planned; the next tick retries
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub data_kind: DataKind,
    pub upstream: String,
    pub enabled: bool,
    pub cadence_seconds: u64,
    pub batch_size: usize,
    pub max_runtime_seconds: u64,
    pub stats: TaskStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub current_task: Option<String>,
    pub in_blackout: bool,
    pub can_run_now: bool,
    pub cycle_count: u64,
    pub tick_interval_seconds: u64,
    pub system_health_score: f64,
    pub tasks: Vec<TaskStatus>,
    pub upstreams: Vec<UpstreamStatus>,
}

#[derive(Debug)]
pub struct UpdateScheduler {
    config: SchedulerConfig,
    blackout: BlackoutWindow,
    registry: Arc<FreshnessRegistry>,
    upstreams: Arc<UpstreamManager>,
    clock: Arc<dyn Clock>,
    /// Registration order breaks ties between tasks of the same kind
    tasks: Vec<Arc<ScheduledTask>>,
    state: Mutex<SchedulerState>,
    cycle_count: AtomicU64,
}

impl UpdateScheduler {
    pub fn new(
        config: SchedulerConfig,
        blackout: BlackoutWindow,
        registry: Arc<FreshnessRegistry>,
        upstreams: Arc<UpstreamManager>,
    ) -> Self {
        let clock = Arc::clone(registry.clock());
        Self {
            config,
            blackout,
            registry,
            upstreams,
            clock,
            tasks: Vec::new(),
            state: Mutex::new(SchedulerState::Idle),
            cycle_count: AtomicU64::new(0),
        }
    }

    /// Build a scheduler with every configured task whose data kind has a handler
    /// in `handlers`. Tasks without a handler are skipped with a warning.
    pub fn from_config(
        config: &OrchestratorConfig,
        registry: Arc<FreshnessRegistry>,
        upstreams: Arc<UpstreamManager>,
        handlers: &HashMap<DataKind, Arc<dyn TaskHandler>>,
    ) -> Result<Self> {
        let blackout = BlackoutWindow::from_config(&config.blackout)?;
        let mut scheduler = Self::new(config.scheduler.clone(), blackout, registry, upstreams);

        for task in &config.tasks {
            match handlers.get(&task.data_kind) {
                Some(handler) => scheduler.register_task(task.clone(), Arc::clone(handler))?,
                None => warn!(
                    task = %task.name,
                    data_kind = %task.data_kind,
                    "⚠️ No handler registered for data kind, task not scheduled"
                ),
            }
        }
        Ok(scheduler)
    }

    pub fn register_task(&mut self, config: TaskConfig, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if self.tasks.iter().any(|t| t.name() == config.name) {
            return Err(OrchestratorError::Configuration(format!(
                "task '{}' is already registered",
                config.name
            )));
        }
        self.registry.kind_config(config.data_kind)?;
        if self.upstreams.get(&config.upstream).is_none() {
            return Err(OrchestratorError::Configuration(format!(
                "task '{}' references unknown upstream '{}'",
                config.name, config.upstream
            )));
        }

        info!(
            task = %config.name,
            data_kind = %config.data_kind,
            upstream = %config.upstream,
            batch_size = config.batch_size,
            "📝 Task registered"
        );
        self.tasks.push(Arc::new(ScheduledTask::new(config, handler)));
        Ok(())
    }

    pub fn registry(&self) -> &Arc<FreshnessRegistry> {
        &self.registry
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    pub fn task(&self, name: &str) -> Option<&Arc<ScheduledTask>> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn state(&self) -> SchedulerState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    /// False while the blackout window is active; always true on non-operational days
    pub fn can_run_now(&self) -> bool {
        !self.blackout.is_active(self.clock.now())
    }

    fn is_eligible(&self, task: &ScheduledTask, in_blackout: bool) -> bool {
        if !task.is_enabled() || !task.cadence_elapsed(self.clock.now()) {
            return false;
        }
        let withheld = in_blackout
            && self
                .registry
                .kind_config(task.data_kind())
                .map(|config| config.skip_during_active_hours)
                .unwrap_or(false);
        !withheld
    }

    /// Select the task and batch for this cycle from a priority queue
    fn plan(&self, queue: &[WorkItem], in_blackout: bool) -> Option<(Arc<ScheduledTask>, Vec<WorkItem>)> {
        let mut skipped_kinds: Vec<DataKind> = Vec::new();
        for item in queue {
            if skipped_kinds.contains(&item.data_kind) {
                continue;
            }
            let task = self
                .tasks
                .iter()
                .find(|t| t.data_kind() == item.data_kind && self.is_eligible(t, in_blackout));
            let Some(task) = task else {
                skipped_kinds.push(item.data_kind);
                continue;
            };
            let batch: Vec<WorkItem> = queue
                .iter()
                .filter(|i| i.data_kind == item.data_kind)
                .take(task.batch_size())
                .cloned()
                .collect();
            return Some((Arc::clone(task), batch));
        }
        None
    }

    /// One decision step: at most one batch per call.
    ///
    /// A failure to read the registry is logged and reported; it never panics
    /// and the next tick simply tries again.
    #[instrument(skip(self, shutdown), fields(cycle = self.cycle_count.load(Ordering::Relaxed) + 1))]
    pub async fn run_update_cycle(&self, shutdown: &ShutdownSignal) -> CycleOutcome {
        self.cycle_count.fetch_add(1, Ordering::Relaxed);
        if shutdown.is_triggered() {
            self.set_state(SchedulerState::Cancelled);
            return CycleOutcome::Cancelled;
        }
        self.set_state(SchedulerState::Checking);

        let queue = match self.registry.get_priority_queue(self.config.max_queue_items).await {
            Ok(queue) => queue,
            Err(e) => {
                error!(error = %e, "❌ SCHEDULER: Cycle skipped, registry unavailable");
                self.set_state(SchedulerState::Idle);
                return CycleOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let in_blackout = self.blackout.is_active(self.clock.now());
        let Some((task, items)) = self.plan(&queue, in_blackout) else {
            debug!(queued = queue.len(), "💤 SCHEDULER: Nothing to run this cycle");
            self.set_state(SchedulerState::Idle);
            return CycleOutcome::Idle;
        };

        let count = items.len();
        let status = self.execute_task(&task, items, shutdown).await;
        if status == TaskRunStatus::Cancelled {
            self.set_state(SchedulerState::Cancelled);
            return CycleOutcome::Cancelled;
        }
        self.set_state(SchedulerState::Idle);
        CycleOutcome::Executed {
            task: task.name().to_string(),
            status,
            items: count,
        }
    }

    /// Run `task` over `items`, enforce its runtime budget and record statistics.
    ///
    /// With `interrupt_on_overrun` the handler is dropped once `max_runtime`
    /// elapses; otherwise it runs to completion. Either way an overrun is
    /// recorded as timed out.
    pub async fn execute_task(
        &self,
        task: &ScheduledTask,
        items: Vec<WorkItem>,
        shutdown: &ShutdownSignal,
    ) -> TaskRunStatus {
        if !task.is_enabled() {
            debug!(task = %task.name(), "Task disabled, skipping");
            return TaskRunStatus::Skipped;
        }

        let run_id = Uuid::new_v4();
        let item_count = items.len();
        self.set_state(SchedulerState::Running {
            task: task.name().to_string(),
        });
        task.mark_started(self.clock.as_ref());

        let Some(upstream) = self.upstreams.get(task.upstream()) else {
            let message = format!("unknown upstream '{}'", task.upstream());
            error!(task = %task.name(), run_id = %run_id, error = %message, "❌ Task cannot run");
            task.record_run(TaskRunStatus::Failed, std::time::Duration::ZERO, 0, Some(message));
            return TaskRunStatus::Failed;
        };

        let bulk = self
            .registry
            .kind_config(task.data_kind())
            .map(|config| config.bulk)
            .unwrap_or(false);
        let batch = WorkBatch {
            run_id,
            task_name: task.name().to_string(),
            data_kind: task.data_kind(),
            bulk,
            items,
        };
        let ctx = TaskContext {
            registry: Arc::clone(&self.registry),
            upstream,
            shutdown: shutdown.clone(),
            worker_concurrency: self.config.worker_concurrency,
        };

        info!(
            task = %task.name(),
            run_id = %run_id,
            items = item_count,
            "🚀 SCHEDULER: Executing task"
        );

        let max_runtime = task.max_runtime();
        let started = Instant::now();
        let handler = Arc::clone(task.handler());

        enum RunResult {
            Finished(Result<BatchReport>),
            Overran,
            Cancelled,
        }

        let run = handler.handle(batch, &ctx);
        let result = if self.config.interrupt_on_overrun {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => RunResult::Cancelled,
                outcome = timeout(max_runtime, run) => match outcome {
                    Ok(result) => RunResult::Finished(result),
                    Err(_) => RunResult::Overran,
                },
            }
        } else {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => RunResult::Cancelled,
                result = run => RunResult::Finished(result),
            }
        };
        let elapsed = started.elapsed();

        let (status, processed, error) = match result {
            RunResult::Cancelled => (TaskRunStatus::Cancelled, 0, Some("cancelled by shutdown".to_string())),
            RunResult::Overran => (
                TaskRunStatus::TimedOut,
                0,
                Some(format!("interrupted after exceeding max runtime of {}s", max_runtime.as_secs())),
            ),
            RunResult::Finished(Err(e)) => (TaskRunStatus::Failed, 0, Some(e.to_string())),
            RunResult::Finished(Ok(report)) if elapsed > max_runtime => (
                TaskRunStatus::TimedOut,
                report.processed(),
                Some(format!("exceeded max runtime of {}s", max_runtime.as_secs())),
            ),
            RunResult::Finished(Ok(report)) if report.is_failure() => (
                TaskRunStatus::Failed,
                report.processed(),
                Some(format!(
                    "no item succeeded ({} failed, {} rejected)",
                    report.failed, report.rejected
                )),
            ),
            RunResult::Finished(Ok(report)) => (TaskRunStatus::Completed, report.processed(), None),
        };

        task.record_run(status, elapsed, processed, error.clone());

        match status {
            TaskRunStatus::Completed => info!(
                task = %task.name(),
                run_id = %run_id,
                duration_ms = elapsed.as_millis() as u64,
                processed = processed,
                "✅ SCHEDULER: Task completed"
            ),
            TaskRunStatus::Cancelled => info!(task = %task.name(), run_id = %run_id, "🛑 SCHEDULER: Task cancelled"),
            _ => warn!(
                task = %task.name(),
                run_id = %run_id,
                status = %status,
                duration_ms = elapsed.as_millis() as u64,
                error = error.as_deref().unwrap_or_default(),
                "⚠️ SCHEDULER: Task did not complete cleanly"
            ),
        }
        status
    }

    /// Run one task now over its kind's current due items, ignoring cadence
    pub async fn run_task_by_name(&self, name: &str, shutdown: &ShutdownSignal) -> Result<TaskRunStatus> {
        let task = self
            .task(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound(name.to_string()))?;
        if !task.is_enabled() {
            return Ok(TaskRunStatus::Skipped);
        }

        let items = self
            .registry
            .get_due_items(task.data_kind(), task.batch_size())
            .await?;
        let status = self.execute_task(&task, items, shutdown).await;
        self.set_state(if status == TaskRunStatus::Cancelled {
            SchedulerState::Cancelled
        } else {
            SchedulerState::Idle
        });
        Ok(status)
    }

    pub fn set_task_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let task = self
            .task(name)
            .ok_or_else(|| OrchestratorError::TaskNotFound(name.to_string()))?;
        task.set_enabled(enabled);
        info!(task = %name, enabled = enabled, "🔧 SCHEDULER: Task toggled");
        Ok(())
    }

    /// Drive cycles on the configured tick until shutdown
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let tick = self.config.tick_interval();
        info!(
            tick_interval_seconds = tick.as_secs(),
            tasks = self.tasks.len(),
            "🚀 SCHEDULER: Starting update loop"
        );

        loop {
            match self.run_update_cycle(&shutdown).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::Executed { task, status, items } => {
                    debug!(task = %task, status = %status, items = items, "Cycle executed a batch");
                }
                CycleOutcome::Idle | CycleOutcome::Failed { .. } => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(tick) => {}
            }
        }

        self.set_state(SchedulerState::Cancelled);
        info!("🛑 SCHEDULER: Update loop stopped");
    }

    pub async fn health_summary(&self) -> HealthSummary {
        self.registry.health_summary().await
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let state = self.state();
        let current_task = match &state {
            SchedulerState::Running { task } => Some(task.clone()),
            _ => None,
        };
        let in_blackout = self.blackout.is_active(self.clock.now());

        SchedulerStatus {
            state,
            current_task,
            in_blackout,
            can_run_now: !in_blackout,
            cycle_count: self.cycle_count.load(Ordering::Relaxed),
            tick_interval_seconds: self.config.tick_interval_seconds,
            system_health_score: self.upstreams.system_health_score(),
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskStatus {
                    name: task.name().to_string(),
                    data_kind: task.data_kind(),
                    upstream: task.upstream().to_string(),
                    enabled: task.is_enabled(),
                    cadence_seconds: task.config().cadence_seconds,
                    batch_size: task.batch_size(),
                    max_runtime_seconds: task.config().max_runtime_seconds,
                    stats: task.stats(),
                })
                .collect(),
            upstreams: self.upstreams.statuses(),
        }
    }
}
