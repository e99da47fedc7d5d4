//! # Orchestrator Configuration
//!
//! Typed configuration for the update orchestrator. Every section has defaults so a
//! minimal (or absent) configuration file still yields a runnable setup.
//!
//! ## Layering
//!
//! - Built-in defaults (`OrchestratorConfig::default()`)
//! - Optional configuration file (`config/orchestrator.toml`, YAML and JSON also accepted)
//! - Environment overrides (`UPDATE_ORCHESTRATOR__SCHEDULER__TICK_INTERVAL_SECONDS=10`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use update_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let tick = manager.config().scheduler.tick_interval();
//! # let _ = tick;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{system, DataKind};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deployment environment name (development, test, production)
    pub environment: String,

    /// Scheduler loop settings
    pub scheduler: SchedulerConfig,

    /// Window during which expensive refreshes are deferred
    pub blackout: BlackoutConfig,

    /// Settings applied to any upstream without its own entry
    pub default_upstream: UpstreamConfig,

    /// Per-upstream resilience settings, keyed by upstream name
    pub upstreams: HashMap<String, UpstreamConfig>,

    /// Per-data-kind freshness settings
    pub data_kinds: HashMap<DataKind, DataKindConfig>,

    /// Periodic tasks driven by the scheduler
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
    /// Upper bound on the merged priority queue read per cycle
    pub max_queue_items: usize,
    /// Simultaneous upstream calls within one batch
    pub worker_concurrency: usize,
    /// Drop a task that exceeds its runtime budget instead of letting it finish
    pub interrupt_on_overrun: bool,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            max_queue_items: 500,
            worker_concurrency: 5,
            interrupt_on_overrun: true,
        }
    }
}

/// One "HH:MM"–"HH:MM" session in local venue time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionWindow {
    pub start: String,
    pub end: String,
}

impl SessionWindow {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Parse the session bounds, rejecting empty or inverted windows.
    pub fn parse(&self) -> ConfigResult<(NaiveTime, NaiveTime)> {
        let start = parse_clock_time("blackout.sessions.start", &self.start)?;
        let end = parse_clock_time("blackout.sessions.end", &self.end)?;
        if end <= start {
            return Err(ConfigurationError::invalid_value(
                "blackout.sessions",
                format!("{}-{}", self.start, self.end),
                "session end must be after session start",
            ));
        }
        Ok((start, end))
    }
}

fn parse_clock_time(field: &str, value: &str) -> ConfigResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|e| ConfigurationError::invalid_value(field, value, e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BlackoutConfig {
    pub enabled: bool,
    /// Venue offset from UTC in minutes (420 = UTC+07:00)
    pub utc_offset_minutes: i32,
    pub sessions: Vec<SessionWindow>,
    /// Days on which the venue operates ("mon", "tue", ...)
    pub operational_days: Vec<String>,
}

impl BlackoutConfig {
    pub fn parsed_days(&self) -> ConfigResult<Vec<Weekday>> {
        self.operational_days
            .iter()
            .map(|day| {
                day.trim().parse::<Weekday>().map_err(|_| {
                    ConfigurationError::invalid_value(
                        "blackout.operational_days",
                        day,
                        "expected a weekday name such as 'mon'",
                    )
                })
            })
            .collect()
    }
}

impl Default for BlackoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: 7 * 60,
            sessions: vec![
                SessionWindow::new("09:00", "11:30"),
                SessionWindow::new("13:00", "15:00"),
            ],
            operational_days: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Symmetric jitter fraction (0.1 = ±10%)
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Resilience settings for one upstream source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub requests_per_minute: u32,
    /// Token bucket capacity; defaults to `requests_per_minute`
    pub burst_capacity: Option<u32>,
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    /// Ceiling for escalated recovery waits; defaults to `recovery_timeout_seconds`
    pub max_recovery_timeout_seconds: Option<u64>,
    pub max_half_open_probes: u32,
    pub call_timeout_seconds: u64,
    pub backoff: BackoffConfig,
}

impl UpstreamConfig {
    pub fn capacity(&self) -> f64 {
        f64::from(self.burst_capacity.unwrap_or(self.requests_per_minute))
    }

    /// Tokens per second
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }

    pub fn max_recovery_timeout(&self) -> Duration {
        Duration::from_secs(
            self.max_recovery_timeout_seconds
                .unwrap_or(self.recovery_timeout_seconds),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        let field = |f: &str| format!("upstreams.{name}.{f}");
        if self.requests_per_minute == 0 {
            return Err(ConfigurationError::invalid_value(
                field("requests_per_minute"),
                "0",
                "must be greater than 0",
            ));
        }
        if self.burst_capacity == Some(0) {
            return Err(ConfigurationError::invalid_value(
                field("burst_capacity"),
                "0",
                "must be greater than 0",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                field("failure_threshold"),
                "0",
                "must be at least 1",
            ));
        }
        if self.max_half_open_probes == 0 {
            return Err(ConfigurationError::invalid_value(
                field("max_half_open_probes"),
                "0",
                "must be at least 1",
            ));
        }
        if self.call_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                field("call_timeout_seconds"),
                "0",
                "every upstream call needs a deadline",
            ));
        }
        if self.max_recovery_timeout() < self.recovery_timeout() {
            return Err(ConfigurationError::invalid_value(
                field("max_recovery_timeout_seconds"),
                self.max_recovery_timeout().as_secs().to_string(),
                "must not be below recovery_timeout_seconds",
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                field("backoff.multiplier"),
                self.backoff.multiplier.to_string(),
                "must be at least 1.0",
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(ConfigurationError::invalid_value(
                field("backoff.jitter"),
                self.backoff.jitter.to_string(),
                "must be within [0.0, 1.0)",
            ));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                field("backoff.max_delay_ms"),
                self.backoff.max_delay_ms.to_string(),
                "must not be below base_delay_ms",
            ));
        }
        Ok(())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 6,
            burst_capacity: None,
            failure_threshold: 5,
            recovery_timeout_seconds: 300,
            max_recovery_timeout_seconds: None,
            max_half_open_probes: 1,
            call_timeout_seconds: 30,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Freshness settings for one data kind
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataKindConfig {
    pub update_interval_seconds: u64,
    /// 1 = highest, 5 = lowest
    pub priority: u8,
    #[serde(default)]
    pub skip_during_active_hours: bool,
    /// Fetched as one all-or-nothing unit rather than per entity
    #[serde(default)]
    pub bulk: bool,
}

impl DataKindConfig {
    pub fn new(update_interval: Duration, priority: u8) -> Self {
        Self {
            update_interval_seconds: update_interval.as_secs(),
            priority,
            skip_during_active_hours: false,
            bulk: false,
        }
    }

    pub fn skip_during_active_hours(mut self) -> Self {
        self.skip_during_active_hours = true;
        self
    }

    pub fn bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }
}

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

pub fn default_data_kinds() -> HashMap<DataKind, DataKindConfig> {
    let secs = Duration::from_secs;
    HashMap::from([
        (DataKind::Price, DataKindConfig::new(secs(DAY), 1)),
        (DataKind::Screener, DataKindConfig::new(secs(6 * HOUR), 2).bulk()),
        (DataKind::History, DataKindConfig::new(secs(DAY), 2)),
        (DataKind::Overview, DataKindConfig::new(secs(7 * DAY), 3)),
        (DataKind::Listings, DataKindConfig::new(secs(7 * DAY), 3).bulk()),
        (
            DataKind::Financials,
            DataKindConfig::new(secs(7 * DAY), 4).skip_during_active_hours(),
        ),
        (
            DataKind::Dividends,
            DataKindConfig::new(secs(7 * DAY), 5).skip_during_active_hours(),
        ),
        (
            DataKind::Ratings,
            DataKindConfig::new(secs(7 * DAY), 5).skip_during_active_hours(),
        ),
    ])
}

/// A periodic task bound to one data kind
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskConfig {
    pub name: String,
    pub data_kind: DataKind,
    #[serde(default = "default_upstream_name")]
    pub upstream: String,
    /// Minimum spacing between two runs of this task
    #[serde(default)]
    pub cadence_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_runtime_seconds")]
    pub max_runtime_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_upstream_name() -> String {
    "primary".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_max_runtime_seconds() -> u64 {
    30 * 60
}

fn default_enabled() -> bool {
    true
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, data_kind: DataKind) -> Self {
        Self {
            name: name.into(),
            data_kind,
            upstream: default_upstream_name(),
            cadence_seconds: 0,
            batch_size: default_batch_size(),
            max_runtime_seconds: default_max_runtime_seconds(),
            enabled: true,
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_seconds)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_seconds)
    }
}

fn default_tasks() -> Vec<TaskConfig> {
    let task = |name: &str, kind: DataKind, batch_size: usize, max_runtime_minutes: u64| {
        TaskConfig {
            batch_size,
            max_runtime_seconds: max_runtime_minutes * 60,
            ..TaskConfig::new(name, kind)
        }
    };
    vec![
        task("price_refresh", DataKind::Price, 10, 30),
        task("screener_snapshot", DataKind::Screener, 1, 30),
        task("history_refresh", DataKind::History, 10, 120),
        task("overview_refresh", DataKind::Overview, 10, 60),
        task("listings_refresh", DataKind::Listings, 1, 30),
        task("financials_refresh", DataKind::Financials, 5, 180),
        task("dividends_refresh", DataKind::Dividends, 5, 60),
        task("ratings_refresh", DataKind::Ratings, 5, 60),
    ]
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            scheduler: SchedulerConfig::default(),
            blackout: BlackoutConfig::default(),
            default_upstream: UpstreamConfig::default(),
            upstreams: HashMap::from([(default_upstream_name(), UpstreamConfig::default())]),
            data_kinds: default_data_kinds(),
            tasks: default_tasks(),
        }
    }
}

impl OrchestratorConfig {
    /// Settings for `name`, falling back to `default_upstream`
    pub fn upstream(&self, name: &str) -> &UpstreamConfig {
        self.upstreams.get(name).unwrap_or(&self.default_upstream)
    }

    pub fn data_kind(&self, kind: DataKind) -> Option<&DataKindConfig> {
        self.data_kinds.get(&kind)
    }

    pub fn is_production_environment(&self) -> bool {
        self.environment == "production"
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.tick_interval_seconds",
                "0",
                "tick interval must be greater than 0",
            ));
        }
        if self.scheduler.max_queue_items == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_queue_items",
                "0",
                "queue size must be greater than 0",
            ));
        }
        if self.scheduler.worker_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.worker_concurrency",
                "0",
                "concurrency must be greater than 0",
            ));
        }

        if self.blackout.enabled {
            if self.blackout.sessions.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "blackout.sessions",
                    "an enabled blackout window",
                ));
            }
            for session in &self.blackout.sessions {
                session.parse()?;
            }
            self.blackout.parsed_days()?;
        }

        self.default_upstream.validate("default")?;
        for (name, upstream) in &self.upstreams {
            upstream.validate(name)?;
        }

        for (kind, kind_config) in &self.data_kinds {
            if kind_config.update_interval_seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("data_kinds.{kind}.update_interval_seconds"),
                    "0",
                    "interval must be greater than 0",
                ));
            }
            if !(system::MIN_PRIORITY..=system::MAX_PRIORITY).contains(&kind_config.priority) {
                return Err(ConfigurationError::invalid_value(
                    format!("data_kinds.{kind}.priority"),
                    kind_config.priority.to_string(),
                    "priority must be between 1 (highest) and 5 (lowest)",
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "tasks.name",
                    "task configuration",
                ));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "tasks.name",
                    &task.name,
                    "task names must be unique",
                ));
            }
            if !self.data_kinds.contains_key(&task.data_kind) {
                return Err(ConfigurationError::invalid_value(
                    format!("tasks.{}.data_kind", task.name),
                    task.data_kind.as_str(),
                    "no data_kinds entry configured for this kind",
                ));
            }
            if task.batch_size == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("tasks.{}.batch_size", task.name),
                    "0",
                    "batch size must be greater than 0",
                ));
            }
            if task.max_runtime_seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("tasks.{}.max_runtime_seconds", task.name),
                    "0",
                    "runtime budget must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}
