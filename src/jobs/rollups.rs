use super::{Job, JobResult};
use crate::{aggregate::Granularity, error::AppError, rollup::Materializer};
use async_trait::async_trait;
use std::sync::Arc;

/// Job materializing the most recently closed window of one granularity.
///
/// One instance is scheduled per granularity; their ticks may overlap in
/// wall-clock time but share no mutable state.
pub struct RollupJob {
    materializer: Arc<Materializer>,
    granularity: Granularity,
}

impl RollupJob {
    pub fn new(materializer: Arc<Materializer>, granularity: Granularity) -> Self {
        Self {
            materializer,
            granularity,
        }
    }
}

#[async_trait]
impl Job for RollupJob {
    fn name(&self) -> &str {
        match self.granularity {
            Granularity::Minute => "minute_rollup",
            Granularity::Day => "daily_rollup",
            Granularity::Week => "weekly_rollup",
        }
    }

    async fn execute(&self) -> Result<JobResult, AppError> {
        let report = self.materializer.materialize_latest(self.granularity).await?;

        if report.is_complete() {
            Ok(JobResult::success_with_count(report.written as u64))
        } else {
            Ok(JobResult::failure(format!(
                "{} of {} aggregate writes failed for window {}",
                report.failures.len(),
                report.written + report.failures.len(),
                report.window_key
            )))
        }
    }
}
