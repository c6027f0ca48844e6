//! Realtime query service: totals for the currently open day or week.
//!
//! Always a live scan through the window aggregator over `[window start,
//! now)`, never served from the rollup store: the open window is by
//! definition not yet materialized. Read-only and safe to invoke
//! concurrently with the materializer.

use crate::aggregate::{Granularity, GroupBy, GroupKey, Window, WindowAggregator};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Global total accumulated so far in an open window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeTotal {
    pub window_end: DateTime<Utc>,
    pub total_count: u64,
}

#[derive(Clone)]
pub struct RealtimeQueryService {
    aggregator: WindowAggregator,
}

impl RealtimeQueryService {
    pub fn new(aggregator: WindowAggregator) -> Self {
        Self { aggregator }
    }

    /// Total tokens used since midnight UTC.
    pub async fn today_so_far(&self) -> Result<RealtimeTotal, AppError> {
        self.so_far(Granularity::Day).await
    }

    /// Total tokens used since Monday 00:00 UTC.
    pub async fn week_so_far(&self) -> Result<RealtimeTotal, AppError> {
        self.so_far(Granularity::Week).await
    }

    async fn so_far(&self, granularity: Granularity) -> Result<RealtimeTotal, AppError> {
        let now = Utc::now();
        let window = Window::new(granularity.round_start(now), now);

        let totals = self.aggregator.aggregate(&window, GroupBy::None).await?;
        let total_count = totals.get(&GroupKey::Global).copied().unwrap_or(0);

        Ok(RealtimeTotal {
            window_end: now,
            total_count,
        })
    }
}
