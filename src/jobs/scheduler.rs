use super::{Job, JobsConfig};
use crate::error::AppError;
use chrono::Utc;
use cron::Schedule;
use std::{str::FromStr, sync::Arc};
use tokio::{
    sync::{RwLock, broadcast, watch},
    task::JoinHandle,
    time::Duration,
};
use tracing::{error, info, warn};

/// Job scheduler that manages periodic execution of jobs
pub struct JobScheduler {
    config: JobsConfig,
    handles: Arc<RwLock<Vec<JoinHandle<()>>>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_coordinator: Option<watch::Receiver<bool>>,
}

impl JobScheduler {
    pub fn new(config: JobsConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            config,
            handles: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            shutdown_coordinator: None,
        }
    }

    /// Create JobScheduler with graceful shutdown integration
    pub fn with_shutdown_coordinator(
        config: JobsConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            config,
            handles: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            shutdown_coordinator: Some(shutdown_rx),
        }
    }

    /// Start the job scheduler with registered jobs
    pub async fn start(&mut self, jobs: Vec<Arc<dyn Job>>) -> Result<(), AppError> {
        if !self.config.enabled {
            info!("Job scheduler disabled in configuration");
            return Ok(());
        }

        info!("Starting job scheduler with {} jobs", jobs.len());

        let mut handles = self.handles.write().await;
        for job in jobs {
            let handle = self.spawn_job_with_schedule(job).await?;
            handles.push(handle);
        }

        info!("Job scheduler started successfully");
        Ok(())
    }

    /// Stop the job scheduler and all running jobs
    pub async fn stop(&mut self) {
        info!("Stopping job scheduler...");

        // Send shutdown signal
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        // Wait for all jobs to complete
        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Job handle failed during shutdown: {}", e);
            }
        }

        info!("Job scheduler stopped");
    }

    /// Spawn a job with its configured schedule
    async fn spawn_job_with_schedule(&self, job: Arc<dyn Job>) -> Result<JoinHandle<()>, AppError> {
        let cron_expr = self.get_schedule_for_job(job.name())?;
        let schedule = Self::parse_schedule(&cron_expr)?;
        // Reject schedules with no future occurrence before spawning.
        Self::duration_until_next(&schedule)?;

        let job_name = job.name().to_string();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut coordinator_rx = self.shutdown_coordinator.clone();

        let handle = tokio::spawn(async move {
            info!("Job '{}' scheduled with cron '{}'", job_name, cron_expr);

            loop {
                // Recomputed every iteration so ticks follow the cron
                // occurrences instead of repeating the first wait as a
                // fixed period.
                let wait = match Self::duration_until_next(&schedule) {
                    Ok(wait) => wait,
                    Err(e) => {
                        error!("Job '{}' has no next occurrence: {}", job_name, e);
                        break;
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        info!("Executing job '{}'", job_name);

                        match job.execute().await {
                            Ok(result) => {
                                if result.success {
                                    info!("Job '{}' completed: {}", job_name, result.message);
                                } else {
                                    warn!("Job '{}' failed: {}", job_name, result.message);
                                }
                            }
                            Err(e) => {
                                error!("Job '{}' execution error: {}", job_name, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job '{}' received internal shutdown signal", job_name);
                        break;
                    }
                    _ = async {
                        if let Some(ref mut coord_rx) = coordinator_rx {
                            coord_rx.changed().await.ok();
                            *coord_rx.borrow()
                        } else {
                            false
                        }
                    }, if coordinator_rx.is_some() => {
                        info!("Job '{}' received global shutdown signal", job_name);
                        break;
                    }
                }
            }

            info!("Job '{}' stopped", job_name);
        });

        Ok(handle)
    }

    /// Get the schedule configuration for a specific job
    fn get_schedule_for_job(&self, job_name: &str) -> Result<String, AppError> {
        match job_name {
            "minute_rollup" => Ok(self.config.rollups.minute_schedule.clone()),
            "daily_rollup" => Ok(self.config.rollups.daily_schedule.clone()),
            "weekly_rollup" => Ok(self.config.rollups.weekly_schedule.clone()),
            "retention_cleanup" => Ok(self.config.cleanup.schedule.clone()),
            _ => Err(AppError::Internal(format!("Unknown job: {job_name}"))),
        }
    }

    /// Parse a cron expression in 6-field format (sec min hour day month dow)
    fn parse_schedule(cron: &str) -> Result<Schedule, AppError> {
        Schedule::from_str(cron)
            .map_err(|e| AppError::Internal(format!("Invalid cron expression '{cron}': {e}")))
    }

    /// Duration from now until the schedule's next occurrence
    fn duration_until_next(schedule: &Schedule) -> Result<Duration, AppError> {
        let now = Utc::now();
        let next_execution = schedule.upcoming(Utc).take(1).next().ok_or_else(|| {
            AppError::Internal(format!(
                "No upcoming execution found for schedule: {schedule}"
            ))
        })?;

        (next_execution - now)
            .to_std()
            .map_err(|e| AppError::Internal(format!("Failed to convert duration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_scheduler() -> JobScheduler {
        JobScheduler::new(JobsConfig::default())
    }

    #[test]
    fn test_valid_cron_expressions() {
        // Test common cron expressions (6-field format: sec min hour day month dow)
        let test_cases = vec![
            "0 * * * * *",     // Every minute
            "0 0 * * * *",     // Every hour
            "0 0 0 * * *",     // Daily at midnight
            "0 0 0 * * MON",   // Weekly on Monday
            "0 0 3 * * *",     // Daily at 3 AM
            "0 */15 * * * *",  // Every 15 minutes
            "0 30 14 * * MON", // Every Monday at 2:30 PM
        ];

        for cron_expr in test_cases {
            let schedule = JobScheduler::parse_schedule(cron_expr);
            assert!(
                schedule.is_ok(),
                "Failed to parse valid cron expression '{}': {:?}",
                cron_expr,
                schedule.err()
            );

            // Duration should be positive (not in the past)
            let duration = JobScheduler::duration_until_next(&schedule.unwrap()).unwrap();
            assert!(
                !duration.is_zero(),
                "Duration should be positive for cron: {cron_expr}"
            );
        }
    }

    #[test]
    fn test_invalid_cron_expressions() {
        let invalid_cases = vec![
            "",           // Empty string
            "invalid",    // Not a cron expression
            "60 * * * *", // Invalid minute (>59)
            "0 25 * * *", // Invalid hour (>23)
            "0 0 32 * *", // Invalid day (>31)
            "0 0 * 13 *", // Invalid month (>12)
            "0 0 * * 8",  // Invalid day of week (>7)
        ];

        for cron_expr in invalid_cases {
            let result = JobScheduler::parse_schedule(cron_expr);
            assert!(
                result.is_err(),
                "Should fail for invalid cron expression: {cron_expr}"
            );
        }
    }

    #[test]
    fn test_wait_never_exceeds_schedule_period() {
        // The wait is derived from the schedule's next occurrence, so it is
        // bounded by the cron period no matter when it is computed. With a
        // fixed repeating interval a weekly job started just before Monday
        // midnight would re-run every few seconds instead.
        let minutely = JobScheduler::parse_schedule("0 * * * * *").unwrap();
        for _ in 0..3 {
            let wait = JobScheduler::duration_until_next(&minutely).unwrap();
            assert!(wait <= Duration::from_secs(60));
        }

        let weekly = JobScheduler::parse_schedule("0 0 0 * * MON").unwrap();
        let wait = JobScheduler::duration_until_next(&weekly).unwrap();
        assert!(wait <= Duration::from_secs(7 * 24 * 60 * 60));
    }

    #[test]
    fn test_get_schedule_for_job() {
        let scheduler = create_test_scheduler();

        assert_eq!(
            scheduler.get_schedule_for_job("minute_rollup").unwrap(),
            "0 * * * * *"
        );
        assert_eq!(
            scheduler.get_schedule_for_job("daily_rollup").unwrap(),
            "0 0 0 * * *"
        );
        assert_eq!(
            scheduler.get_schedule_for_job("weekly_rollup").unwrap(),
            "0 0 0 * * MON"
        );
        assert_eq!(
            scheduler.get_schedule_for_job("retention_cleanup").unwrap(),
            "0 0 3 * * *"
        );

        // Test unknown job name
        assert!(scheduler.get_schedule_for_job("unknown_job").is_err());
    }
}
