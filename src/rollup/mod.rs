//! Rollup materializer: computes the aggregate for a closed window from a
//! single raw-event scan and upserts one row per group key.
//!
//! Every write is an idempotent upsert keyed by `(granularity, window_key,
//! group_key)`, so re-running a window after a crash or redelivery yields
//! bit-identical rows and never double-counts.

use crate::aggregate::{Granularity, GroupBy, GroupKey, Window, WindowAggregator};
use crate::error::AppError;
use crate::storage::{RollupStore as _, Storage, StorageError, WindowAggregate};
use chrono::Utc;
use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Outcome of materializing one window. Per-group write failures are
/// collected here instead of aborting the batch; the next run of the same
/// window converges on the full result.
#[derive(Debug)]
pub struct MaterializeReport {
    pub granularity: Granularity,
    pub window_key: String,
    pub written: usize,
    pub failures: Vec<WriteFailure>,
}

impl MaterializeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct WriteFailure {
    pub group_key: GroupKey,
    pub error: StorageError,
}

/// Result of the offline global-vs-per-user consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantReport {
    pub granularity: Granularity,
    pub window_key: String,
    pub global_total: Option<u64>,
    pub user_sum: u64,
    pub consistent: bool,
}

pub struct Materializer {
    storage: Arc<Storage>,
    aggregator: WindowAggregator,
    write_concurrency: usize,
    op_timeout: Duration,
}

impl Materializer {
    pub fn new(storage: Arc<Storage>, write_concurrency: usize, op_timeout: Duration) -> Self {
        let aggregator = WindowAggregator::new(storage.raw_events.clone());
        Self {
            storage,
            aggregator,
            write_concurrency: write_concurrency.max(1),
            op_timeout,
        }
    }

    /// Materialize the most recently closed window for this granularity.
    /// Also the entry point for the operational "recompute now" trigger.
    pub async fn materialize_latest(
        &self,
        granularity: Granularity,
    ) -> Result<MaterializeReport, AppError> {
        let window = granularity.last_closed(Utc::now());
        self.materialize_window(granularity, window).await
    }

    /// Materialize one window: the global row is written first, then the
    /// per-user and per-resource rows fan out with bounded concurrency.
    /// All group totals derive from the same raw-event scan, which is what
    /// keeps the global row equal to the sum of the per-user rows.
    pub async fn materialize_window(
        &self,
        granularity: Granularity,
        window: Window,
    ) -> Result<MaterializeReport, AppError> {
        let window_key = granularity.window_key(&window);

        info!(
            granularity = granularity.as_str(),
            window_key = %window_key,
            "Materializing window [{} .. {})",
            window.start,
            window.end
        );

        let events = match timeout(self.op_timeout, self.aggregator.events_in(&window)).await {
            Ok(result) => result?,
            Err(_) => return Err(StorageError::Timeout(self.op_timeout).into()),
        };

        let global_total = WindowAggregator::reduce(&events, GroupBy::None)
            .remove(&GroupKey::Global)
            .unwrap_or(0);
        let per_user = WindowAggregator::reduce(&events, GroupBy::User);
        let per_resource = WindowAggregator::reduce(&events, GroupBy::Resource);

        let mut written = 0usize;
        let mut failures = Vec::new();

        // Global row first; its failure never blocks the grouped writes.
        let global_row = WindowAggregate {
            granularity,
            window_key: window_key.clone(),
            group_key: GroupKey::Global,
            total_count: global_total,
        };
        match self.upsert(global_row).await {
            Ok(()) => written += 1,
            Err(error) => {
                error!(
                    granularity = granularity.as_str(),
                    window_key = %window_key,
                    "Failed to write global aggregate: {}",
                    error
                );
                failures.push(WriteFailure {
                    group_key: GroupKey::Global,
                    error,
                });
            }
        }

        let rows: Vec<WindowAggregate> = per_user
            .into_iter()
            .chain(per_resource)
            .map(|(group_key, total_count)| WindowAggregate {
                granularity,
                window_key: window_key.clone(),
                group_key,
                total_count,
            })
            .collect();

        let mut writes = stream::iter(rows.into_iter().map(|row| async move {
            let group_key = row.group_key.clone();
            (group_key, self.upsert(row).await)
        }))
        .buffer_unordered(self.write_concurrency);

        while let Some((group_key, result)) = writes.next().await {
            match result {
                Ok(()) => written += 1,
                Err(error) => {
                    error!(
                        granularity = granularity.as_str(),
                        window_key = %window_key,
                        group_key = group_key.label(),
                        "Failed to write aggregate: {}",
                        error
                    );
                    failures.push(WriteFailure { group_key, error });
                }
            }
        }

        let report = MaterializeReport {
            granularity,
            window_key,
            written,
            failures,
        };

        if report.is_complete() {
            info!(
                granularity = granularity.as_str(),
                window_key = %report.window_key,
                "Materialized {} aggregates",
                report.written
            );
        } else {
            warn!(
                granularity = granularity.as_str(),
                window_key = %report.window_key,
                "Materialized {} aggregates, {} writes failed",
                report.written,
                report.failures.len()
            );
        }

        Ok(report)
    }

    async fn upsert(&self, row: WindowAggregate) -> Result<(), StorageError> {
        let granularity = row.granularity;
        let result = match timeout(self.op_timeout, self.storage.rollups.upsert(row)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.op_timeout)),
        };
        crate::metrics::track_rollup_write(granularity.as_str(), result.is_ok());
        result
    }

    /// Offline consistency check for a closed window: the global total must
    /// equal the sum of all per-user totals. A violation is a monitoring
    /// signal (self-healing on the next re-run of the window), not an error.
    pub async fn verify_window(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> Result<InvariantReport, AppError> {
        let rows = self
            .storage
            .rollups
            .list_window(granularity, window_key)
            .await?;

        let mut global_total = None;
        let mut user_sum = 0u64;
        let mut user_rows = 0usize;

        for row in rows {
            match row.group_key {
                GroupKey::Global => global_total = Some(row.total_count),
                GroupKey::User(_) => {
                    user_sum = user_sum.saturating_add(row.total_count);
                    user_rows += 1;
                }
                GroupKey::Resource(_) => {}
            }
        }

        let consistent = match global_total {
            Some(total) => total == user_sum,
            // No global row yet: consistent only if there are no user rows either.
            None => user_rows == 0,
        };

        crate::metrics::track_invariant_check(granularity.as_str(), consistent);
        if !consistent {
            warn!(
                granularity = granularity.as_str(),
                window_key,
                global_total = ?global_total,
                user_sum,
                "Window aggregate invariant violated"
            );
        }

        Ok(InvariantReport {
            granularity,
            window_key: window_key.to_string(),
            global_total,
            user_sum,
            consistent,
        })
    }
}
