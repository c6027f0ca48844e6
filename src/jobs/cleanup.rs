use super::{CleanupConfig, Job, JobResult};
use crate::{
    aggregate::Granularity,
    error::AppError,
    storage::{RawEventStore as _, RollupStore as _, Storage},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

/// Job for pruning raw events and expired rollups past their retention
/// horizons. Raw retention must stay at least as long as the largest
/// window the materializer may be asked to recompute.
pub struct CleanupJob {
    storage: Arc<Storage>,
    config: CleanupConfig,
}

impl CleanupJob {
    pub fn new(storage: Arc<Storage>, config: CleanupConfig) -> Self {
        Self { storage, config }
    }
}

#[async_trait]
impl Job for CleanupJob {
    fn name(&self) -> &str {
        "retention_cleanup"
    }

    async fn execute(&self) -> Result<JobResult, AppError> {
        let now = Utc::now();
        let mut total_pruned = 0u64;

        let raw_cutoff = now - Duration::days(self.config.raw_events_days as i64);
        let pruned = self.storage.raw_events.prune_before(raw_cutoff).await?;
        info!("Pruned {} raw events older than {}", pruned, raw_cutoff);
        total_pruned += pruned;

        for granularity in Granularity::ALL {
            let retention = self.config.retention_days(granularity);
            let cutoff_key = granularity.instant_key(now - Duration::days(retention as i64));

            let pruned = self
                .storage
                .rollups
                .prune_before(granularity, &cutoff_key)
                .await?;
            info!(
                "Pruned {} {} rollups with window key before {}",
                pruned,
                granularity.as_str(),
                cutoff_key
            );
            total_pruned += pruned;
        }

        Ok(JobResult::success_with_count(total_pruned))
    }
}
