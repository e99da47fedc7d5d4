mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use update_orchestrator::config::{BlackoutConfig, DataKindConfig};
use update_orchestrator::registry::{RecommendationKind, RecommendationPriority};
use update_orchestrator::{
    BlackoutWindow, Clock, DataKind, FreshnessRegistry, HealthLabel, InMemoryUpdateStore, ManualClock,
    UpdateStatus, UpdateStore, WorkReason,
};

const DAY: u64 = 24 * 60 * 60;

fn kinds() -> HashMap<DataKind, DataKindConfig> {
    HashMap::from([
        (DataKind::Price, DataKindConfig::new(Duration::from_secs(DAY), 1)),
        (
            DataKind::Financials,
            DataKindConfig::new(Duration::from_secs(7 * DAY), 4).skip_during_active_hours(),
        ),
    ])
}

#[tokio::test]
async fn test_never_updated_always_ranks_ahead_of_stale() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let registry = registry_with(kinds(), Arc::new(FakeCatalog::new(&["ACB", "FPT", "VNM", "HPG"])), clock.clone());

    // Oldest success first among the previously updated
    registry.mark_updated("VNM", DataKind::Price, UpdateStatus::Success, None).await.unwrap();
    clock.advance(ChronoDuration::hours(1));
    registry.mark_updated("ACB", DataKind::Price, UpdateStatus::Success, None).await.unwrap();
    clock.advance(ChronoDuration::days(2));

    let due = registry.get_due_items(DataKind::Price, 10).await.unwrap();
    let order: Vec<(&str, WorkReason)> = due.iter().map(|i| (i.entity_id.as_str(), i.reason)).collect();
    assert_eq!(
        order,
        vec![
            ("FPT", WorkReason::NeverUpdated),
            ("HPG", WorkReason::NeverUpdated),
            ("VNM", WorkReason::Stale),
            ("ACB", WorkReason::Stale),
        ]
    );
}

#[tokio::test]
async fn test_mark_updated_success_and_failure_semantics() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let store = Arc::new(InMemoryUpdateStore::new());
    let registry = FreshnessRegistry::new(
        kinds(),
        store.clone(),
        Arc::new(FakeCatalog::new(&["ACB"])),
        clock.clone(),
    );

    let failed = registry
        .mark_updated("ACB", DataKind::Price, UpdateStatus::Failed, Some("timeout"))
        .await
        .unwrap();
    assert_eq!(failed.consecutive_failures, 1);
    assert_eq!(failed.next_due, clock.now());
    let due = registry.get_due_items(DataKind::Price, 10).await.unwrap();
    assert_eq!(due[0].reason, WorkReason::Retry);

    clock.advance(ChronoDuration::minutes(5));
    let ok = registry
        .mark_updated("ACB", DataKind::Price, UpdateStatus::Success, None)
        .await
        .unwrap();
    assert!(ok.next_due > failed.next_due);
    assert_eq!(ok.next_due, clock.now() + ChronoDuration::hours(24));
    assert_eq!(ok.consecutive_failures, 0);
    assert_eq!(ok.last_error, None);
    assert_eq!(ok.attempt_count, 2);

    let stored = store.get("ACB", DataKind::Price).await.unwrap().unwrap();
    assert_eq!(stored, ok);
}

#[tokio::test]
async fn test_identical_marks_at_same_instant_are_idempotent() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let registry = registry_with(kinds(), Arc::new(FakeCatalog::new(&["ACB"])), clock);

    let once = registry
        .mark_updated("ACB", DataKind::Price, UpdateStatus::Failed, Some("502"))
        .await
        .unwrap();
    let twice = registry
        .mark_updated("ACB", DataKind::Price, UpdateStatus::Failed, Some("502"))
        .await
        .unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.consecutive_failures, 1);
}

#[tokio::test]
async fn test_concurrent_marks_keep_one_record_per_pair() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let store = Arc::new(InMemoryUpdateStore::new());
    let registry = Arc::new(FreshnessRegistry::new(
        kinds(),
        store.clone(),
        Arc::new(FakeCatalog::new(&["ACB", "FPT"])),
        clock,
    ));

    let mut handles = Vec::new();
    for entity in ["ACB", "FPT", "ACB", "FPT"] {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .mark_updated(entity, DataKind::Price, UpdateStatus::Success, None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.len(), 2);
    assert!(registry.get_due_items(DataKind::Price, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blackout_withholds_deferred_kinds_from_priority_queue() {
    // Monday 10:00 at UTC+7
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap()));
    let blackout = BlackoutWindow::from_config(&BlackoutConfig::default()).unwrap();
    let registry = FreshnessRegistry::new(
        kinds(),
        Arc::new(InMemoryUpdateStore::new()),
        Arc::new(FakeCatalog::new(&["ACB"])),
        clock.clone(),
    )
    .with_blackout(blackout);

    assert!(registry.is_in_blackout());
    let queue = registry.get_priority_queue(10).await.unwrap();
    assert!(queue.iter().all(|item| item.data_kind == DataKind::Price));

    // Lunch break
    clock.advance(ChronoDuration::hours(2));
    assert!(!registry.is_in_blackout());
    let queue = registry.get_priority_queue(10).await.unwrap();
    let kinds: Vec<DataKind> = queue.iter().map(|item| item.data_kind).collect();
    assert_eq!(kinds, vec![DataKind::Price, DataKind::Financials]);
}

#[tokio::test]
async fn test_health_summary_is_best_effort_when_catalog_is_down() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let catalog = Arc::new(FakeCatalog::new(&["ACB", "FPT"]));
    let registry = registry_with(kinds(), catalog.clone(), clock);
    registry.mark_updated("ACB", DataKind::Price, UpdateStatus::Success, None).await.unwrap();

    let summary = registry.health_summary().await;
    let price = summary.kind(DataKind::Price).unwrap();
    assert_eq!(price.fresh, 1);
    assert_eq!(price.never_updated, 1);
    assert_eq!(price.fresh_percentage, 50.0);
    assert_eq!(price.status, HealthLabel::Degraded);

    catalog.set_offline(true);
    let summary = registry.health_summary().await;
    assert_eq!(summary.overall_status, HealthLabel::NoData);
    assert!(summary.kinds.iter().all(|kind| kind.error.is_some()));
    assert!(serde_json::to_value(&summary).is_ok());
}

#[tokio::test]
async fn test_startup_check_and_clear_failed() {
    let clock = Arc::new(ManualClock::new(saturday_morning()));
    let registry = registry_with(kinds(), Arc::new(FakeCatalog::new(&["ACB", "FPT"])), clock);
    registry
        .mark_batch_updated(&["ACB".to_string()], DataKind::Price, UpdateStatus::Failed, Some("503"))
        .await
        .unwrap();

    let report = registry.startup_check().await;
    assert!(report.needs_attention());
    assert!(report.recommendations.iter().any(|r| r.kind == RecommendationKind::MissingData
        && r.priority == RecommendationPriority::High
        && r.data_kind == Some(DataKind::Price)));
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.kind == RecommendationKind::FailedUpdates));

    assert_eq!(registry.clear_failed(None).await.unwrap(), 1);
    let summary = registry.health_summary().await;
    assert_eq!(summary.total_failed, 0);
    // Cleared records are still due
    let due = registry.get_due_items(DataKind::Price, 10).await.unwrap();
    assert_eq!(due.len(), 2);
}
