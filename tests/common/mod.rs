//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use update_orchestrator::config::{BackoffConfig, DataKindConfig, UpstreamConfig};
use update_orchestrator::{
    Collector, DataKind, Database, EntityCatalog, EntityFilter, FreshnessRegistry,
    InMemoryUpdateStore, ManualClock, OrchestratorError, Result, UpstreamError,
};

/// Saturday, so no blackout window applies
pub fn saturday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 3, 0, 0).unwrap()
}

/// Catalog over a fixed, mutable list of entities
#[derive(Debug, Default)]
pub struct FakeCatalog {
    entities: Mutex<Vec<String>>,
    offline: std::sync::atomic::AtomicBool,
}

impl FakeCatalog {
    pub fn new(entities: &[&str]) -> Self {
        Self {
            entities: Mutex::new(entities.iter().map(|e| e.to_string()).collect()),
            offline: Default::default(),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityCatalog for FakeCatalog {
    async fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<String>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Catalog("catalog offline".to_string()));
        }
        let mut entities = self.entities.lock().clone();
        if let Some(limit) = filter.limit {
            entities.truncate(limit);
        }
        Ok(entities)
    }
}

/// One collected row
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub entity_id: String,
    pub close: f64,
}

/// Database that remembers every upsert
#[derive(Debug)]
pub struct RecordingDatabase {
    catalog: FakeCatalog,
    pub writes: Mutex<Vec<(DataKind, Vec<Quote>)>>,
}

impl RecordingDatabase {
    pub fn new(entities: &[&str]) -> Self {
        Self {
            catalog: FakeCatalog::new(entities),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn written_entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self
            .writes
            .lock()
            .iter()
            .flat_map(|(_, quotes)| quotes.iter().map(|q| q.entity_id.clone()))
            .collect();
        entities.sort();
        entities
    }
}

#[async_trait]
impl EntityCatalog for RecordingDatabase {
    async fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<String>> {
        self.catalog.query_entities(filter).await
    }
}

#[async_trait]
impl Database<Quote> for RecordingDatabase {
    async fn upsert(&self, data_kind: DataKind, records: Vec<Quote>) -> Result<usize> {
        let count = records.len();
        self.writes.lock().push((data_kind, records));
        Ok(count)
    }
}

/// Scripted response for one collector call
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Fail,
    Hang,
}

/// Collector that follows a script, then falls back to a default step.
/// Counts every invocation.
#[derive(Debug)]
pub struct ScriptedCollector {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedCollector {
    pub fn always(step: Step) -> Self {
        Self::scripted(Vec::new(), step)
    }

    pub fn scripted(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    async fn run(&self, entity_id: &str) -> std::result::Result<Vec<Quote>, UpstreamError> {
        match self.next_step() {
            Step::Ok => Ok(vec![Quote {
                entity_id: entity_id.to_string(),
                close: 23_450.0,
            }]),
            Step::Fail => Err(UpstreamError::transient("503 Service Unavailable")),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    type Record = Quote;

    async fn collect(&self, entity_id: &str) -> std::result::Result<Vec<Quote>, UpstreamError> {
        self.run(entity_id).await
    }

    async fn collect_batch(&self) -> std::result::Result<Vec<Quote>, UpstreamError> {
        self.run("*").await
    }
}

/// Upstream settings fast enough for paused-clock tests
pub fn fast_upstream(failure_threshold: u32) -> UpstreamConfig {
    UpstreamConfig {
        requests_per_minute: 600,
        burst_capacity: Some(5),
        failure_threshold,
        recovery_timeout_seconds: 60,
        call_timeout_seconds: 5,
        backoff: BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..UpstreamConfig::default()
    }
}

pub fn price_kinds() -> HashMap<DataKind, DataKindConfig> {
    HashMap::from([(
        DataKind::Price,
        DataKindConfig::new(Duration::from_secs(24 * 60 * 60), 1),
    )])
}

pub fn registry_with(
    kinds: HashMap<DataKind, DataKindConfig>,
    catalog: Arc<dyn EntityCatalog>,
    clock: Arc<ManualClock>,
) -> Arc<FreshnessRegistry> {
    Arc::new(FreshnessRegistry::new(
        kinds,
        Arc::new(InMemoryUpdateStore::new()),
        catalog,
        clock,
    ))
}
