//! Storage traits for the raw event log and the rollup store.
//!
//! Real backends plug in behind these traits; the crate ships an in-memory
//! implementation used by tests and single-process deployments.

use crate::aggregate::{Granularity, GroupKey};
use crate::events::UsageEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod memory;

pub use memory::{MemoryRawEventStore, MemoryRollupStore};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Not found")]
    NotFound,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A materialized aggregate for one window and one group key.
///
/// Identity is `(granularity, window_key, group_key)`; writes with the same
/// identity replace the stored row in full. A re-run of the materializer
/// therefore never double-counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub granularity: Granularity,
    pub window_key: String,
    pub group_key: GroupKey,
    pub total_count: u64,
}

impl WindowAggregate {
    pub fn id(&self) -> AggregateId {
        AggregateId {
            granularity: self.granularity,
            window_key: self.window_key.clone(),
            group_key: self.group_key.clone(),
        }
    }
}

/// Unique identity of a materialized aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggregateId {
    pub granularity: Granularity,
    pub window_key: String,
    pub group_key: GroupKey,
}

/// Append-only record of received usage events, queryable by timestamp
/// range. Source of truth for any range not yet rolled up.
#[async_trait]
pub trait RawEventStore: Send + Sync {
    async fn append(&self, event: UsageEvent) -> StorageResult<()>;

    /// All events with `start <= timestamp < end`, ordered by timestamp.
    async fn scan_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<UsageEvent>>;

    /// Drop events older than `cutoff`, returning how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}

/// Materialized aggregates keyed by identity, with idempotent upsert.
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Insert or fully replace the aggregate with the same identity.
    async fn upsert(&self, aggregate: WindowAggregate) -> StorageResult<()>;

    async fn get(&self, id: &AggregateId) -> StorageResult<Option<WindowAggregate>>;

    /// All aggregates for one `(granularity, window_key)` pair.
    async fn list_window(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> StorageResult<Vec<WindowAggregate>>;

    /// Drop aggregates of this granularity whose window key sorts before
    /// `cutoff_key`, returning how many were removed.
    async fn prune_before(&self, granularity: Granularity, cutoff_key: &str)
    -> StorageResult<u64>;
}

/// Unified storage handle combining both stores.
pub struct Storage {
    pub raw_events: Arc<dyn RawEventStore>,
    pub rollups: Arc<dyn RollupStore>,
}

impl Storage {
    pub fn new(raw_events: Arc<dyn RawEventStore>, rollups: Arc<dyn RollupStore>) -> Self {
        Self { raw_events, rollups }
    }

    pub fn new_in_memory() -> Self {
        Self::new(
            Arc::new(MemoryRawEventStore::new()),
            Arc::new(MemoryRollupStore::new()),
        )
    }
}
