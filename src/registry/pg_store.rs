//! # PostgreSQL Update Store
//!
//! [`UpdateStore`] over an externally owned tracking table. The schema belongs to
//! the embedding application; the expected shape is:
//!
//! ```sql
//! CREATE TABLE data_update_tracker (
//!     entity_id            TEXT        NOT NULL,
//!     data_kind            TEXT        NOT NULL,
//!     last_update          TIMESTAMPTZ,
//!     last_attempt         TIMESTAMPTZ,
//!     last_status          TEXT        NOT NULL,
//!     last_error           TEXT,
//!     next_due             TIMESTAMPTZ NOT NULL,
//!     priority             SMALLINT    NOT NULL,
//!     consecutive_failures INTEGER     NOT NULL DEFAULT 0,
//!     attempt_count        BIGINT      NOT NULL DEFAULT 0,
//!     PRIMARY KEY (entity_id, data_kind)
//! );
//! ```
//!
//! Each `apply` runs in its own transaction. A seed row is inserted with
//! `ON CONFLICT DO NOTHING` so that even a first attempt has a row to lock,
//! then the row is locked with `SELECT ... FOR UPDATE`, merged in Rust and
//! written back. Concurrent writers for the same pair serialize on that lock.

use super::store::UpdateStore;
use super::types::{UpdateOutcome, UpdateRecord};
use crate::constants::{DataKind, UpdateStatus};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

pub const DEFAULT_TABLE: &str = "data_update_tracker";

const COLUMNS: &str = "entity_id, data_kind, last_update, last_attempt, last_status, last_error, \
                       next_due, priority, consecutive_failures, attempt_count";

#[derive(Debug, Clone)]
pub struct PgUpdateStore {
    pool: PgPool,
    table: String,
}

impl PgUpdateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Use a different table, optionally schema-qualified (`schema.table`)
    pub fn with_table(pool: PgPool, table: &str) -> Result<Self> {
        let valid = !table.is_empty()
            && table.split('.').count() <= 2
            && table.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && !part.starts_with(|c: char| c.is_ascii_digit())
            });
        if !valid {
            return Err(OrchestratorError::Configuration(format!(
                "invalid update tracker table name '{table}'"
            )));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Binds `record` as `$1..$10` in `COLUMNS` order
    fn bind_record<'q>(
        query: Query<'q, Postgres, PgArguments>,
        record: &'q UpdateRecord,
    ) -> Query<'q, Postgres, PgArguments> {
        query
            .bind(&record.entity_id)
            .bind(record.data_kind.as_str())
            .bind(record.last_update)
            .bind(record.last_attempt)
            .bind(record.last_status.as_str())
            .bind(&record.last_error)
            .bind(record.next_due)
            .bind(i16::from(record.priority))
            .bind(i32::try_from(record.consecutive_failures).unwrap_or(i32::MAX))
            .bind(i64::try_from(record.attempt_count).unwrap_or(i64::MAX))
    }

    fn record_from_row(row: &PgRow) -> Result<UpdateRecord> {
        let data_kind: String = row.try_get("data_kind")?;
        let last_status: String = row.try_get("last_status")?;
        let priority: i16 = row.try_get("priority")?;
        let consecutive_failures: i32 = row.try_get("consecutive_failures")?;
        let attempt_count: i64 = row.try_get("attempt_count")?;

        Ok(UpdateRecord {
            entity_id: row.try_get("entity_id")?,
            data_kind: data_kind
                .parse()
                .map_err(|e: String| OrchestratorError::store("decode data_kind", e))?,
            last_update: row.try_get("last_update")?,
            last_attempt: row.try_get("last_attempt")?,
            last_status: last_status
                .parse()
                .map_err(|e: String| OrchestratorError::store("decode last_status", e))?,
            last_error: row.try_get("last_error")?,
            next_due: row.try_get("next_due")?,
            priority: u8::try_from(priority).unwrap_or(u8::MAX),
            consecutive_failures: u32::try_from(consecutive_failures).unwrap_or(0),
            attempt_count: u64::try_from(attempt_count).unwrap_or(0),
        })
    }
}

#[async_trait]
impl UpdateStore for PgUpdateStore {
    async fn get(&self, entity_id: &str, data_kind: DataKind) -> Result<Option<UpdateRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE entity_id = $1 AND data_kind = $2",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(data_kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn records_for_kind(&self, data_kind: DataKind) -> Result<Vec<UpdateRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE data_kind = $1", self.table);
        let rows = sqlx::query(&sql)
            .bind(data_kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn apply(&self, outcome: &UpdateOutcome) -> Result<UpdateRecord> {
        let mut tx = self.pool.begin().await?;

        let seed = UpdateRecord::seed_for(outcome);
        let insert_seed = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (entity_id, data_kind) DO NOTHING",
            self.table
        );
        Self::bind_record(sqlx::query(&insert_seed), &seed)
            .execute(&mut *tx)
            .await?;

        let select = format!(
            "SELECT {COLUMNS} FROM {} WHERE entity_id = $1 AND data_kind = $2 FOR UPDATE",
            self.table
        );
        let row = sqlx::query(&select)
            .bind(&outcome.entity_id)
            .bind(outcome.data_kind.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let existing = Self::record_from_row(&row)?;

        let merged = UpdateRecord::apply(Some(&existing), outcome);
        if existing == merged {
            tx.commit().await?;
            return Ok(merged);
        }

        let update = format!(
            "UPDATE {} SET \
                last_update = $3, \
                last_attempt = $4, \
                last_status = $5, \
                last_error = $6, \
                next_due = $7, \
                priority = $8, \
                consecutive_failures = $9, \
                attempt_count = $10 \
             WHERE entity_id = $1 AND data_kind = $2",
            self.table
        );
        Self::bind_record(sqlx::query(&update), &merged)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(
            entity_id = %merged.entity_id,
            data_kind = %merged.data_kind,
            status = %merged.last_status,
            "💾 Update record persisted"
        );
        Ok(merged)
    }

    async fn reset_failed(&self, entity_id: Option<&str>, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET last_status = $1, consecutive_failures = 0, last_error = NULL, next_due = $2 \
             WHERE last_status = $3 AND ($4::TEXT IS NULL OR entity_id = $4)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(UpdateStatus::Pending.as_str())
            .bind(now)
            .bind(UpdateStatus::Failed.as_str())
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
