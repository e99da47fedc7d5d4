//! # Freshness Registry
//!
//! Per `(entity, data kind)` staleness bookkeeping and the prioritized due-lists
//! the scheduler consumes.
//!
//! ## Ordering
//!
//! Within a kind, entities that have never been refreshed come first, then the
//! oldest successful refresh first. Failed entities stay eligible. Across kinds,
//! the configured priority (1 = highest) decides, then staleness.
//!
//! Kinds flagged `bulk` are tracked as one synthetic entity
//! ([`BULK_ENTITY_ID`](crate::constants::system::BULK_ENTITY_ID)) instead of one
//! record per entity.

use super::store::UpdateStore;
use super::types::{
    HealthSummary, KindHealth, Recommendation, RecommendationKind, RecommendationPriority,
    StartupReport, UpdateOutcome, UpdateRecord, WorkItem,
};
use crate::clock::Clock;
use crate::config::{DataKindConfig, OrchestratorConfig};
use crate::constants::{system, DataKind, HealthLabel, UpdateStatus, WorkReason};
use crate::error::{OrchestratorError, Result};
use crate::logging::log_update_operation;
use crate::orchestration::blackout::BlackoutWindow;
use crate::orchestration::interfaces::{EntityCatalog, EntityFilter};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FreshnessRegistry {
    kinds: HashMap<DataKind, DataKindConfig>,
    store: Arc<dyn UpdateStore>,
    catalog: Arc<dyn EntityCatalog>,
    clock: Arc<dyn Clock>,
    blackout: BlackoutWindow,
}

impl fmt::Debug for FreshnessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshnessRegistry")
            .field("kinds", &self.kinds)
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("blackout", &self.blackout)
            .finish_non_exhaustive()
    }
}

impl FreshnessRegistry {
    pub fn new(
        kinds: HashMap<DataKind, DataKindConfig>,
        store: Arc<dyn UpdateStore>,
        catalog: Arc<dyn EntityCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kinds,
            store,
            catalog,
            clock,
            blackout: BlackoutWindow::disabled(),
        }
    }

    /// Withhold `skip_during_active_hours` kinds while `blackout` is active
    pub fn with_blackout(mut self, blackout: BlackoutWindow) -> Self {
        self.blackout = blackout;
        self
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        store: Arc<dyn UpdateStore>,
        catalog: Arc<dyn EntityCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let blackout = BlackoutWindow::from_config(&config.blackout)?;
        Ok(Self::new(config.data_kinds.clone(), store, catalog, clock).with_blackout(blackout))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn kind_config(&self, data_kind: DataKind) -> Result<&DataKindConfig> {
        self.kinds.get(&data_kind).ok_or_else(|| {
            OrchestratorError::Registry(format!("data kind '{data_kind}' is not configured"))
        })
    }

    /// Configured kinds, highest priority first
    pub fn kinds_by_priority(&self) -> Vec<DataKind> {
        let mut kinds: Vec<DataKind> = self.kinds.keys().copied().collect();
        kinds.sort_by_key(|kind| (self.kinds[kind].priority, *kind));
        kinds
    }

    pub fn is_in_blackout(&self) -> bool {
        self.blackout.is_active(self.clock.now())
    }

    /// Whether `data_kind` is withheld at `now` by the blackout window
    pub fn is_withheld(&self, data_kind: DataKind, now: DateTime<Utc>) -> bool {
        self.kinds
            .get(&data_kind)
            .is_some_and(|config| config.skip_during_active_hours)
            && self.blackout.is_active(now)
    }

    fn interval(config: &DataKindConfig) -> ChronoDuration {
        ChronoDuration::from_std(config.update_interval()).unwrap_or(ChronoDuration::MAX)
    }

    async fn entities_for(&self, data_kind: DataKind, config: &DataKindConfig) -> Result<Vec<String>> {
        if config.bulk {
            return Ok(vec![system::BULK_ENTITY_ID.to_string()]);
        }
        self.catalog
            .query_entities(&EntityFilter::for_kind(data_kind))
            .await
    }

    /// Due entities of one kind: no record, stale, or failed.
    ///
    /// Never-updated entities come first, then oldest `last_update` first.
    pub async fn get_due_items(&self, data_kind: DataKind, limit: usize) -> Result<Vec<WorkItem>> {
        let config = self.kind_config(data_kind)?;
        let now = self.clock.now();
        self.due_items_at(data_kind, config, limit, now).await
    }

    async fn due_items_at(
        &self,
        data_kind: DataKind,
        config: &DataKindConfig,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>> {
        let interval = Self::interval(config);
        let mut entities = self.entities_for(data_kind, config).await?;
        entities.sort();
        entities.dedup();
        let mut records: HashMap<String, UpdateRecord> = self
            .store
            .records_for_kind(data_kind)
            .await?
            .into_iter()
            .map(|record| (record.entity_id.clone(), record))
            .collect();

        let mut due: Vec<WorkItem> = entities
            .into_iter()
            .filter_map(|entity_id| match records.remove(&entity_id) {
                None => Some(WorkItem {
                    entity_id,
                    data_kind,
                    priority: config.priority,
                    reason: WorkReason::NeverUpdated,
                    last_update: None,
                    consecutive_failures: 0,
                }),
                Some(record) => record.due_reason(now, interval).map(|reason| WorkItem {
                    entity_id,
                    data_kind,
                    priority: config.priority,
                    reason,
                    last_update: record.last_update,
                    consecutive_failures: record.consecutive_failures,
                }),
            })
            .collect();

        due.sort_by(|a, b| a.staleness_key().cmp(&b.staleness_key()));
        due.truncate(limit);

        debug!(data_kind = %data_kind, due = due.len(), "🔍 Computed due items");
        Ok(due)
    }

    /// Due items across every kind, by priority then staleness.
    ///
    /// Kinds flagged `skip_during_active_hours` are left out while the blackout
    /// window is active.
    pub async fn get_priority_queue(&self, max_items: usize) -> Result<Vec<WorkItem>> {
        let now = self.clock.now();
        let mut queue = Vec::new();

        for data_kind in self.kinds_by_priority() {
            if self.is_withheld(data_kind, now) {
                debug!(data_kind = %data_kind, "⏸️ Withheld during active hours");
                continue;
            }
            let config = self.kind_config(data_kind)?;
            queue.extend(self.due_items_at(data_kind, config, max_items, now).await?);
        }

        queue.sort_by(|a, b| {
            (a.priority, a.last_update, a.data_kind, a.entity_id.as_str()).cmp(&(
                b.priority,
                b.last_update,
                b.data_kind,
                b.entity_id.as_str(),
            ))
        });
        queue.truncate(max_items);
        Ok(queue)
    }

    /// Record the outcome of one refresh attempt.
    ///
    /// Success sets `next_due = now + interval` and clears the failure streak.
    /// Failure bumps the streak and leaves the entity due immediately.
    pub async fn mark_updated(
        &self,
        entity_id: &str,
        data_kind: DataKind,
        status: UpdateStatus,
        error: Option<&str>,
    ) -> Result<UpdateRecord> {
        let config = self.kind_config(data_kind)?;
        let outcome = UpdateOutcome {
            entity_id: entity_id.to_string(),
            data_kind,
            status,
            error: error.map(str::to_string),
            at: self.clock.now(),
            interval: Self::interval(config),
            priority: config.priority,
        };
        let record = self.store.apply(&outcome).await?;

        log_update_operation(
            "mark_updated",
            data_kind.as_str(),
            Some(entity_id),
            status.as_str(),
            error,
        );
        Ok(record)
    }

    /// Record the same outcome for several entities; returns how many were written
    pub async fn mark_batch_updated(
        &self,
        entity_ids: &[String],
        data_kind: DataKind,
        status: UpdateStatus,
        error: Option<&str>,
    ) -> Result<usize> {
        let mut written = 0;
        for entity_id in entity_ids {
            self.mark_updated(entity_id, data_kind, status, error).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Move failed records back to pending so they are retried from a clean
    /// streak. Records stay due.
    pub async fn clear_failed(&self, entity_id: Option<&str>) -> Result<u64> {
        let cleared = self.store.reset_failed(entity_id, self.clock.now()).await?;
        info!(cleared = cleared, entity_id = entity_id, "🧹 Cleared failed update records");
        Ok(cleared)
    }

    async fn kind_health(&self, data_kind: DataKind, config: &DataKindConfig, now: DateTime<Utc>) -> Result<KindHealth> {
        let interval = Self::interval(config);
        let entities = self.entities_for(data_kind, config).await?;
        let records: HashMap<String, UpdateRecord> = self
            .store
            .records_for_kind(data_kind)
            .await?
            .into_iter()
            .map(|record| (record.entity_id.clone(), record))
            .collect();

        let mut health = KindHealth {
            data_kind,
            priority: config.priority,
            update_interval_seconds: config.update_interval_seconds,
            total_entities: entities.len(),
            fresh: 0,
            stale: 0,
            never_updated: 0,
            failed: 0,
            fresh_percentage: 0.0,
            status: HealthLabel::NoData,
            oldest_update: None,
            newest_update: None,
            error: None,
        };

        for entity_id in &entities {
            let Some(record) = records.get(entity_id) else {
                health.never_updated += 1;
                continue;
            };
            if record.last_status == UpdateStatus::Failed {
                health.failed += 1;
            }
            match record.last_update {
                None => health.never_updated += 1,
                Some(last) => {
                    if record.is_fresh(now, interval) {
                        health.fresh += 1;
                    } else {
                        health.stale += 1;
                    }
                    health.oldest_update = Some(health.oldest_update.map_or(last, |o| o.min(last)));
                    health.newest_update = Some(health.newest_update.map_or(last, |n| n.max(last)));
                }
            }
        }

        if health.total_entities > 0 {
            health.fresh_percentage = health.fresh as f64 * 100.0 / health.total_entities as f64;
            health.status = HealthLabel::from_fresh_percentage(health.fresh_percentage);
        }
        Ok(health)
    }

    /// Per-kind freshness counts and labels.
    ///
    /// Best effort: a kind whose entities or records cannot be read is reported
    /// with its `error` set instead of failing the whole summary.
    pub async fn health_summary(&self) -> HealthSummary {
        let now = self.clock.now();
        let mut kinds = Vec::with_capacity(self.kinds.len());

        for data_kind in self.kinds_by_priority() {
            let config = &self.kinds[&data_kind];
            let health = match self.kind_health(data_kind, config, now).await {
                Ok(health) => health,
                Err(error) => {
                    warn!(data_kind = %data_kind, error = %error, "⚠️ Health check could not read data kind");
                    KindHealth {
                        data_kind,
                        priority: config.priority,
                        update_interval_seconds: config.update_interval_seconds,
                        total_entities: 0,
                        fresh: 0,
                        stale: 0,
                        never_updated: 0,
                        failed: 0,
                        fresh_percentage: 0.0,
                        status: HealthLabel::NoData,
                        oldest_update: None,
                        newest_update: None,
                        error: Some(error.to_string()),
                    }
                }
            };
            kinds.push(health);
        }

        let total_entities: usize = kinds.iter().map(|k| k.total_entities).sum();
        let total_fresh: usize = kinds.iter().map(|k| k.fresh).sum();
        let total_failed: usize = kinds.iter().map(|k| k.failed).sum();
        let (overall_fresh_percentage, overall_status) = if total_entities == 0 {
            (0.0, HealthLabel::NoData)
        } else {
            let percent = total_fresh as f64 * 100.0 / total_entities as f64;
            (percent, HealthLabel::from_fresh_percentage(percent))
        };

        HealthSummary {
            generated_at: now,
            in_blackout: self.blackout.is_active(now),
            overall_status,
            overall_fresh_percentage,
            total_entities,
            total_fresh,
            total_failed,
            kinds,
        }
    }

    /// Health summary plus actionable recommendations, run once at startup
    pub async fn startup_check(&self) -> StartupReport {
        info!("🔍 Running startup data health check");
        let summary = self.health_summary().await;
        let mut recommendations = Vec::new();

        for kind in &summary.kinds {
            if kind.priority == system::MIN_PRIORITY && kind.never_updated > 0 {
                recommendations.push(Recommendation {
                    priority: RecommendationPriority::High,
                    kind: RecommendationKind::MissingData,
                    data_kind: Some(kind.data_kind),
                    message: format!(
                        "{} entities have never had {} data collected",
                        kind.never_updated, kind.data_kind
                    ),
                    action: format!("Run initial {} collection", kind.data_kind),
                });
            }
            if kind.total_entities > 0 && kind.stale + kind.never_updated > kind.fresh {
                recommendations.push(Recommendation {
                    priority: RecommendationPriority::Medium,
                    kind: RecommendationKind::StaleData,
                    data_kind: Some(kind.data_kind),
                    message: format!("Most {} data is outdated", kind.data_kind),
                    action: format!("Trigger {} update cycle", kind.data_kind),
                });
            }
        }

        if summary.total_failed > 0 {
            recommendations.push(Recommendation {
                priority: RecommendationPriority::Medium,
                kind: RecommendationKind::FailedUpdates,
                data_kind: None,
                message: format!(
                    "{} updates have failed and need retry",
                    summary.total_failed
                ),
                action: "Review error logs and clear failed updates".to_string(),
            });
        }

        info!(
            entities = summary.total_entities,
            fresh = summary.total_fresh,
            failed = summary.total_failed,
            status = ?summary.overall_status,
            recommendations = recommendations.len(),
            "📊 Startup data check complete"
        );

        StartupReport {
            summary,
            recommendations,
        }
    }
}
