//! # Collector Handler
//!
//! The standard [`TaskHandler`]: fetch each work item through the upstream guard,
//! persist the records, and write the outcome back to the freshness registry.
//!
//! Items run on a bounded pool (`buffer_unordered`) no wider than the upstream's
//! token bucket capacity, so extra workers would only queue inside the limiter.
//! A failure on one item never aborts the batch.

use super::interfaces::{Collector, Database};
use super::task::{BatchReport, TaskContext, TaskHandler, WorkBatch};
use crate::constants::{DataKind, UpdateStatus};
use crate::error::Result;
use crate::logging::log_error;
use crate::registry::WorkItem;
use crate::resilience::UpstreamCallError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Succeeded { records: usize },
    Failed,
    Rejected,
    Cancelled,
}

pub struct CollectorHandler<C, D> {
    collector: Arc<C>,
    database: Arc<D>,
}

impl<C, D> CollectorHandler<C, D>
where
    C: Collector + 'static,
    D: Database<C::Record> + 'static,
{
    pub fn new(collector: Arc<C>, database: Arc<D>) -> Self {
        Self {
            collector,
            database,
        }
    }

    async fn process_item(
        &self,
        item: WorkItem,
        data_kind: DataKind,
        bulk: bool,
        ctx: &TaskContext,
    ) -> ItemOutcome {
        if ctx.shutdown.is_triggered() {
            return ItemOutcome::Cancelled;
        }

        let collector = &self.collector;
        let entity_id = item.entity_id.as_str();
        let fetched = ctx
            .upstream
            .call(&ctx.shutdown, || {
                if bulk {
                    collector.collect_batch()
                } else {
                    collector.collect(entity_id)
                }
            })
            .await;

        match fetched {
            Ok(records) => {
                let count = records.len();
                match self.database.upsert(data_kind, records).await {
                    Ok(written) => {
                        self.mark(ctx, entity_id, data_kind, UpdateStatus::Success, None)
                            .await;
                        debug!(
                            entity_id = %entity_id,
                            data_kind = %data_kind,
                            fetched = count,
                            written = written,
                            "✅ Item refreshed"
                        );
                        ItemOutcome::Succeeded { records: written }
                    }
                    Err(error) => {
                        let message = error.to_string();
                        log_error("collector_handler", "upsert", &message, Some(entity_id));
                        self.mark(ctx, entity_id, data_kind, UpdateStatus::Failed, Some(&message))
                            .await;
                        ItemOutcome::Failed
                    }
                }
            }
            Err(UpstreamCallError::CircuitOpen { upstream }) => {
                debug!(entity_id = %entity_id, upstream = %upstream, "⛔ Skipped, circuit open");
                ItemOutcome::Rejected
            }
            Err(UpstreamCallError::Cancelled) => ItemOutcome::Cancelled,
            Err(UpstreamCallError::Failed(error)) => {
                let message = error.to_string();
                warn!(
                    entity_id = %entity_id,
                    data_kind = %data_kind,
                    upstream = %ctx.upstream.name(),
                    error = %message,
                    "🔴 Upstream fetch failed"
                );
                self.mark(ctx, entity_id, data_kind, UpdateStatus::Failed, Some(&message))
                    .await;
                // Cancellation during backoff ends this item only
                let _ = ctx.upstream.backoff_after_failure(&ctx.shutdown).await;
                ItemOutcome::Failed
            }
        }
    }

    async fn mark(
        &self,
        ctx: &TaskContext,
        entity_id: &str,
        data_kind: DataKind,
        status: UpdateStatus,
        error: Option<&str>,
    ) {
        if let Err(e) = ctx
            .registry
            .mark_updated(entity_id, data_kind, status, error)
            .await
        {
            log_error("collector_handler", "mark_updated", &e.to_string(), Some(entity_id));
        }
    }
}

#[async_trait]
impl<C, D> TaskHandler for CollectorHandler<C, D>
where
    C: Collector + 'static,
    D: Database<C::Record> + 'static,
{
    async fn handle(&self, batch: WorkBatch, ctx: &TaskContext) -> Result<BatchReport> {
        let concurrency = ctx
            .worker_concurrency
            .min(ctx.upstream.max_concurrency())
            .max(1);
        let data_kind = batch.data_kind;
        let bulk = batch.bulk;
        let total = batch.items.len();

        let outcomes: Vec<ItemOutcome> = stream::iter(batch.items)
            .map(|item| self.process_item(item, data_kind, bulk, ctx))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Succeeded { records } => {
                    report.succeeded += 1;
                    report.records_written += records;
                }
                ItemOutcome::Failed => report.failed += 1,
                ItemOutcome::Rejected => report.rejected += 1,
                ItemOutcome::Cancelled => report.cancelled += 1,
            }
        }

        if report.rejected > 0 {
            warn!(
                task = %batch.task_name,
                upstream = %ctx.upstream.name(),
                rejected = report.rejected,
                "⚠️ Circuit open, items deferred to a later cycle"
            );
        }
        info!(
            task = %batch.task_name,
            run_id = %batch.run_id,
            data_kind = %data_kind,
            items = total,
            concurrency = concurrency,
            succeeded = report.succeeded,
            failed = report.failed,
            rejected = report.rejected,
            cancelled = report.cancelled,
            "📦 Batch processed"
        );
        Ok(report)
    }
}
