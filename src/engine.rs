//! Engine assembly: wires storage, the materializer, the realtime and
//! ranking services, the ingest worker and the job scheduler, and exposes
//! the read API consumed by the external HTTP layer.

use crate::aggregate::{Granularity, WindowAggregator};
use crate::config::Config;
use crate::error::AppError;
use crate::events::{ChannelEventSource, IngestWorker};
use crate::jobs::{CleanupJob, Job, JobScheduler, RollupJob};
use crate::ranking::{RankingEntry, RankingService};
use crate::realtime::{RealtimeQueryService, RealtimeTotal};
use crate::rollup::{InvariantReport, MaterializeReport, Materializer};
use crate::storage::{RollupStore as _, Storage, WindowAggregate};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct StatsEngine {
    config: Config,
    storage: Arc<Storage>,
    materializer: Arc<Materializer>,
    realtime: RealtimeQueryService,
    ranking: RankingService,
    ingest_tx: mpsc::Sender<Vec<u8>>,
    // Taken exactly once by run().
    ingest_source: Mutex<Option<ChannelEventSource>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StatsEngine {
    /// Engine over the built-in in-memory storage.
    pub fn new(config: Config) -> Self {
        let storage = Arc::new(Storage::new_in_memory());
        Self::with_storage(config, storage)
    }

    /// Engine over externally provided storage backends.
    pub fn with_storage(config: Config, storage: Arc<Storage>) -> Self {
        let op_timeout = Duration::from_secs(config.storage.op_timeout_secs);
        let materializer = Arc::new(Materializer::new(
            storage.clone(),
            config.jobs.rollups.write_concurrency,
            op_timeout,
        ));
        let realtime =
            RealtimeQueryService::new(WindowAggregator::new(storage.raw_events.clone()));
        let ranking = RankingService::new(storage.rollups.clone());
        let (ingest_tx, ingest_source) = ChannelEventSource::new(config.ingest.channel_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            storage,
            materializer,
            realtime,
            ranking,
            ingest_tx,
            ingest_source: Mutex::new(Some(ingest_source)),
            shutdown_tx,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Sender handle the transport glue uses to feed serialized events in.
    pub fn event_sink(&self) -> mpsc::Sender<Vec<u8>> {
        self.ingest_tx.clone()
    }

    /// Materialized aggregates for one window, ordered by group key for a
    /// stable response.
    pub async fn window_aggregates(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> Result<Vec<WindowAggregate>, AppError> {
        let mut rows = self
            .storage
            .rollups
            .list_window(granularity, window_key)
            .await?;
        rows.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        Ok(rows)
    }

    /// Realtime global total for today so far.
    pub async fn realtime_daily(&self) -> Result<RealtimeTotal, AppError> {
        self.realtime.today_so_far().await
    }

    /// Realtime global total for this week so far.
    pub async fn realtime_weekly(&self) -> Result<RealtimeTotal, AppError> {
        self.realtime.week_so_far().await
    }

    /// Resource ranking over a closed window's materialized aggregates.
    pub async fn rankings(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> Result<Vec<RankingEntry>, AppError> {
        self.ranking.rankings(granularity, window_key).await
    }

    /// Admin trigger: recompute the most recently closed window now.
    pub async fn recompute_latest(
        &self,
        granularity: Granularity,
    ) -> Result<MaterializeReport, AppError> {
        self.materializer.materialize_latest(granularity).await
    }

    /// Offline consistency check for a materialized window.
    pub async fn verify_window(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> Result<InvariantReport, AppError> {
        self.materializer.verify_window(granularity, window_key).await
    }

    /// Signal the running engine to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the ingest worker and the job scheduler until ctrl-c or
    /// [`shutdown`](Self::shutdown). Jobs abandoned mid-tick leave partial
    /// upserts behind; the next materialization of the window repairs them.
    pub async fn run(&self) -> Result<(), AppError> {
        let source = self
            .ingest_source
            .lock()
            .map_err(|_| AppError::Internal("ingest source lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| AppError::Internal("engine is already running".to_string()))?;

        info!("Starting usage stats engine");

        let op_timeout = Duration::from_secs(self.config.storage.op_timeout_secs);
        let worker = IngestWorker::new(
            self.storage.raw_events.clone(),
            op_timeout,
            self.shutdown_tx.subscribe(),
        );
        let ingest_handle = tokio::spawn(worker.run(source));

        let mut scheduler = JobScheduler::with_shutdown_coordinator(
            self.config.jobs.clone(),
            self.shutdown_tx.subscribe(),
        );
        let jobs: Vec<Arc<dyn Job>> = vec![
            Arc::new(RollupJob::new(self.materializer.clone(), Granularity::Minute)),
            Arc::new(RollupJob::new(self.materializer.clone(), Granularity::Day)),
            Arc::new(RollupJob::new(self.materializer.clone(), Granularity::Week)),
            Arc::new(CleanupJob::new(
                self.storage.clone(),
                self.config.jobs.cleanup.clone(),
            )),
        ];
        scheduler.start(jobs).await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if !*shutdown_rx.borrow_and_update() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received ctrl-c, shutting down");
                    let _ = self.shutdown_tx.send(true);
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown requested");
                }
            }
        }

        scheduler.stop().await;
        if let Err(e) = ingest_handle.await {
            return Err(AppError::Internal(format!(
                "ingest worker failed during shutdown: {e}"
            )));
        }

        info!("Usage stats engine stopped");
        Ok(())
    }
}
