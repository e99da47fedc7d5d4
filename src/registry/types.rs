//! Registry data model: per `(entity, data kind)` update records, due work items
//! and health reporting snapshots.

use crate::constants::{DataKind, HealthLabel, UpdateStatus, WorkReason};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping for one `(entity_id, data_kind)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub entity_id: String,
    pub data_kind: DataKind,
    /// Last successful refresh
    pub last_update: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_status: UpdateStatus,
    pub last_error: Option<String>,
    pub next_due: DateTime<Utc>,
    pub priority: u8,
    pub consecutive_failures: u32,
    pub attempt_count: u64,
}

/// One `mark_updated` call, fully resolved against configuration and clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub entity_id: String,
    pub data_kind: DataKind,
    pub status: UpdateStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
    pub interval: ChronoDuration,
    pub priority: u8,
}

impl UpdateRecord {
    /// Fresh record for a pair that has never been attempted
    pub fn new(entity_id: impl Into<String>, data_kind: DataKind, priority: u8, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            data_kind,
            last_update: None,
            last_attempt: None,
            last_status: UpdateStatus::Pending,
            last_error: None,
            next_due: now,
            priority,
            consecutive_failures: 0,
            attempt_count: 0,
        }
    }

    /// The record `outcome` is merged onto when the pair has no history yet
    pub fn seed_for(outcome: &UpdateOutcome) -> Self {
        Self::new(
            outcome.entity_id.clone(),
            outcome.data_kind,
            outcome.priority,
            outcome.at,
        )
    }

    /// Upsert `outcome` onto `existing`.
    ///
    /// Replaying an outcome that is already recorded (same attempt time, status
    /// and error) returns the stored record unchanged.
    pub fn apply(existing: Option<&UpdateRecord>, outcome: &UpdateOutcome) -> UpdateRecord {
        if let Some(current) = existing {
            if current.is_replay_of(outcome) {
                return current.clone();
            }
        }

        let mut record = existing
            .cloned()
            .unwrap_or_else(|| UpdateRecord::seed_for(outcome));
        record.priority = outcome.priority;

        match outcome.status {
            UpdateStatus::Success => {
                record.attempt_count += 1;
                record.last_attempt = Some(outcome.at);
                record.last_update = Some(outcome.at);
                record.last_status = UpdateStatus::Success;
                record.last_error = None;
                record.consecutive_failures = 0;
                record.next_due = outcome
                    .at
                    .checked_add_signed(outcome.interval)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
            }
            UpdateStatus::Failed => {
                record.attempt_count += 1;
                record.last_attempt = Some(outcome.at);
                record.last_status = UpdateStatus::Failed;
                record.last_error = outcome.error.clone();
                record.consecutive_failures += 1;
                record.next_due = outcome.at;
            }
            UpdateStatus::Pending => {
                record.last_status = UpdateStatus::Pending;
                record.last_error = outcome.error.clone();
                record.next_due = outcome.at;
            }
        }
        record
    }

    fn is_replay_of(&self, outcome: &UpdateOutcome) -> bool {
        outcome.status != UpdateStatus::Pending
            && self.last_attempt == Some(outcome.at)
            && self.last_status == outcome.status
            && self.last_error == outcome.error
    }

    /// Why this record is due at `now`, if it is. A successful record becomes
    /// due once `now` has passed `last_update + interval`.
    pub fn due_reason(&self, now: DateTime<Utc>, interval: ChronoDuration) -> Option<WorkReason> {
        match (self.last_status, self.last_update) {
            (UpdateStatus::Failed, _) | (UpdateStatus::Pending, Some(_)) => Some(WorkReason::Retry),
            (_, None) => Some(WorkReason::NeverUpdated),
            (_, Some(last)) if last.checked_add_signed(interval).is_some_and(|due| due < now) => {
                Some(WorkReason::Stale)
            }
            _ => None,
        }
    }

    /// Successfully refreshed within `interval` and not failing
    pub fn is_fresh(&self, now: DateTime<Utc>, interval: ChronoDuration) -> bool {
        self.due_reason(now, interval).is_none()
    }
}

/// A scheduled unit of update work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub entity_id: String,
    pub data_kind: DataKind,
    pub priority: u8,
    pub reason: WorkReason,
    pub last_update: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl WorkItem {
    /// Ordering within one kind: never-updated first, then oldest `last_update`
    pub(crate) fn staleness_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.last_update, self.entity_id.as_str())
    }
}

/// Freshness counts for one data kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindHealth {
    pub data_kind: DataKind,
    pub priority: u8,
    pub update_interval_seconds: u64,
    pub total_entities: usize,
    pub fresh: usize,
    pub stale: usize,
    pub never_updated: usize,
    pub failed: usize,
    pub fresh_percentage: f64,
    pub status: HealthLabel,
    pub oldest_update: Option<DateTime<Utc>>,
    pub newest_update: Option<DateTime<Utc>>,
    /// Set when this kind could not be inspected; counts are then zero
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub generated_at: DateTime<Utc>,
    pub in_blackout: bool,
    pub overall_status: HealthLabel,
    pub overall_fresh_percentage: f64,
    pub total_entities: usize,
    pub total_fresh: usize,
    pub total_failed: usize,
    pub kinds: Vec<KindHealth>,
}

impl HealthSummary {
    pub fn kind(&self, data_kind: DataKind) -> Option<&KindHealth> {
        self.kinds.iter().find(|k| k.data_kind == data_kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    MissingData,
    StaleData,
    FailedUpdates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub kind: RecommendationKind,
    pub data_kind: Option<DataKind>,
    pub message: String,
    pub action: String,
}

/// Result of the startup data check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupReport {
    pub summary: HealthSummary,
    pub recommendations: Vec<Recommendation>,
}

impl StartupReport {
    pub fn needs_attention(&self) -> bool {
        self.recommendations
            .iter()
            .any(|r| r.priority == RecommendationPriority::High)
    }
}
