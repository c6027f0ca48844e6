pub mod cleanup;
pub mod rollups;
pub mod scheduler;

use crate::aggregate::Granularity;
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use cleanup::CleanupJob;
pub use rollups::RollupJob;
pub use scheduler::JobScheduler;

/// Configuration for the job system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Enable/disable the internal job scheduler
    pub enabled: bool,

    /// Rollup materialization schedules
    pub rollups: RollupJobsConfig,

    /// Retention cleanup job configuration
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupJobsConfig {
    /// Cron schedule for minute rollups (6-field format)
    pub minute_schedule: String,
    /// Cron schedule for daily rollups
    pub daily_schedule: String,
    /// Cron schedule for weekly rollups
    pub weekly_schedule: String,
    /// Bound on concurrent per-group aggregate writes within one tick
    pub write_concurrency: usize,
}

impl Default for RollupJobsConfig {
    fn default() -> Self {
        Self {
            minute_schedule: "0 * * * * *".to_string(), // Every minute
            daily_schedule: "0 0 0 * * *".to_string(),  // Midnight UTC
            weekly_schedule: "0 0 0 * * MON".to_string(), // Monday midnight UTC
            write_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Cron schedule expression
    pub schedule: String,
    /// Retention for raw events in days; must cover the maximum rollup
    /// recomputation window
    pub raw_events_days: u32,
    /// Retention for rollups by granularity in days
    #[serde(default = "default_rollup_retention_days")]
    pub rollup_retention_days: HashMap<Granularity, u32>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            schedule: "0 0 3 * * *".to_string(), // Daily at 3 AM
            raw_events_days: 30,
            rollup_retention_days: default_rollup_retention_days(),
        }
    }
}

/// Default rollup retention by granularity
pub fn default_rollup_retention_days() -> HashMap<Granularity, u32> {
    let mut map = HashMap::new();
    map.insert(Granularity::Minute, 7); // Keep minute rollups for 7 days
    map.insert(Granularity::Day, 90); // Keep daily rollups for 90 days
    map.insert(Granularity::Week, 365); // Keep weekly rollups for 1 year
    map
}

impl CleanupConfig {
    /// Get the retention days for a specific granularity
    pub fn retention_days(&self, granularity: Granularity) -> u32 {
        self.rollup_retention_days
            .get(&granularity)
            .copied()
            .unwrap_or_else(|| {
                let defaults = default_rollup_retention_days();
                defaults.get(&granularity).copied().unwrap_or(365)
            })
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rollups: RollupJobsConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

/// Result of job execution
#[derive(Debug, Clone)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    pub items_processed: u64,
}

impl JobResult {
    pub fn success_with_count(count: u64) -> Self {
        Self {
            success: true,
            message: format!("Successfully processed {count} items"),
            items_processed: count,
        }
    }

    pub fn success() -> Self {
        Self {
            success: true,
            message: "Job completed successfully".to_string(),
            items_processed: 0,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            items_processed: 0,
        }
    }
}

/// Trait for executable jobs
#[async_trait]
pub trait Job: Send + Sync {
    /// Get the job name for logging and identification
    fn name(&self) -> &str;

    /// Execute the job and return the result
    async fn execute(&self) -> Result<JobResult, AppError>;
}
