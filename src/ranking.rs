//! Resource rankings derived from a closed window's materialized
//! aggregates. Pure read; an empty result just means no events.

use crate::aggregate::{Granularity, GroupKey};
use crate::error::AppError;
use crate::storage::RollupStore;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub resource_id: String,
    pub total_count: u64,
}

pub struct RankingService {
    rollups: Arc<dyn RollupStore>,
}

impl RankingService {
    pub fn new(rollups: Arc<dyn RollupStore>) -> Self {
        Self { rollups }
    }

    /// Resources ranked by materialized usage in the given window, highest
    /// first. Ties are broken by resource id ascending so repeated calls
    /// return the same order.
    pub async fn rankings(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> Result<Vec<RankingEntry>, AppError> {
        let rows = self.rollups.list_window(granularity, window_key).await?;

        let mut totals: Vec<(String, u64)> = rows
            .into_iter()
            .filter_map(|row| match row.group_key {
                GroupKey::Resource(id) => Some((id, row.total_count)),
                GroupKey::Global | GroupKey::User(_) => None,
            })
            .collect();

        totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(totals
            .into_iter()
            .enumerate()
            .map(|(i, (resource_id, total_count))| RankingEntry {
                rank: (i + 1) as u32,
                resource_id,
                total_count,
            })
            .collect())
    }
}
