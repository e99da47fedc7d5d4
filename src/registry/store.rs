//! Storage seam for update records.
//!
//! Implementations must make each [`UpdateStore::apply`] atomic for its record
//! (read, merge, write) with last-writer-wins between concurrent writers.
//! Nothing spans more than one record.

use super::types::{UpdateOutcome, UpdateRecord};
use crate::constants::{DataKind, UpdateStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt::Debug;

#[async_trait]
pub trait UpdateStore: Send + Sync + Debug {
    async fn get(&self, entity_id: &str, data_kind: DataKind) -> Result<Option<UpdateRecord>>;

    async fn records_for_kind(&self, data_kind: DataKind) -> Result<Vec<UpdateRecord>>;

    /// Atomically merge `outcome` into its record and return the stored result
    async fn apply(&self, outcome: &UpdateOutcome) -> Result<UpdateRecord>;

    /// Move failed records (optionally of one entity) back to pending; returns how many changed
    async fn reset_failed(&self, entity_id: Option<&str>, now: DateTime<Utc>) -> Result<u64>;
}

/// Process-local store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryUpdateStore {
    records: DashMap<(String, DataKind), UpdateRecord>,
}

impl InMemoryUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UpdateStore for InMemoryUpdateStore {
    async fn get(&self, entity_id: &str, data_kind: DataKind) -> Result<Option<UpdateRecord>> {
        Ok(self
            .records
            .get(&(entity_id.to_string(), data_kind))
            .map(|entry| entry.value().clone()))
    }

    async fn records_for_kind(&self, data_kind: DataKind) -> Result<Vec<UpdateRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().1 == data_kind)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn apply(&self, outcome: &UpdateOutcome) -> Result<UpdateRecord> {
        let key = (outcome.entity_id.clone(), outcome.data_kind);
        // The entry guard holds the shard lock for the whole read-merge-write
        let mut entry = self.records.entry(key).or_insert_with(|| {
            UpdateRecord::new(
                outcome.entity_id.clone(),
                outcome.data_kind,
                outcome.priority,
                outcome.at,
            )
        });
        let merged = UpdateRecord::apply(Some(entry.value()), outcome);
        *entry.value_mut() = merged.clone();
        Ok(merged)
    }

    async fn reset_failed(&self, entity_id: Option<&str>, now: DateTime<Utc>) -> Result<u64> {
        let mut changed = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.last_status != UpdateStatus::Failed {
                continue;
            }
            if entity_id.is_some_and(|id| id != record.entity_id) {
                continue;
            }
            record.last_status = UpdateStatus::Pending;
            record.consecutive_failures = 0;
            record.last_error = None;
            record.next_due = now;
            changed += 1;
        }
        Ok(changed)
    }
}
