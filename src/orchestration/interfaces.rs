//! # External Collaborators
//!
//! Seams to the code this crate does not own: collectors that fetch from an
//! upstream, and the database that persists results and knows which entities exist.
//! Collectors return typed records so the orchestrator never needs payload knowledge.

use crate::constants::DataKind;
use crate::error::Result;
use crate::resilience::UpstreamError;
use async_trait::async_trait;

/// Fetches data of one kind from one upstream
#[async_trait]
pub trait Collector: Send + Sync {
    type Record: Send + Sync + 'static;

    /// Fetch the records for one entity
    async fn collect(&self, entity_id: &str) -> std::result::Result<Vec<Self::Record>, UpstreamError>;

    /// Fetch the whole source in one all-or-nothing request
    async fn collect_batch(&self) -> std::result::Result<Vec<Self::Record>, UpstreamError> {
        Err(UpstreamError::permanent(
            "collector does not expose a bulk endpoint",
        ))
    }
}

/// Selects which entities to track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    /// Restrict to entities relevant for this kind
    pub data_kind: Option<DataKind>,
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_kind(data_kind: DataKind) -> Self {
        Self {
            data_kind: Some(data_kind),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Source of the universe of trackable entities
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    async fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<String>>;
}

/// Persistence for collected records
#[async_trait]
pub trait Database<R: Send + 'static>: EntityCatalog {
    /// Insert or replace records; returns how many were written
    async fn upsert(&self, data_kind: DataKind, records: Vec<R>) -> Result<usize>;
}
