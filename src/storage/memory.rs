use super::{AggregateId, RawEventStore, RollupStore, StorageResult, WindowAggregate};
use crate::aggregate::Granularity;
use crate::events::UsageEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory raw event store ordered by timestamp.
///
/// Events with equal timestamps are kept distinct by an insertion sequence
/// number, so duplicates survive the append (deduplication is not this
/// layer's job).
pub struct MemoryRawEventStore {
    events: RwLock<BTreeMap<(DateTime<Utc>, u64), UsageEvent>>,
    seq: AtomicU64,
}

impl MemoryRawEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for MemoryRawEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawEventStore for MemoryRawEventStore {
    async fn append(&self, event: UsageEvent) -> StorageResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.events
            .write()
            .await
            .insert((event.timestamp, seq), event);
        Ok(())
    }

    async fn scan_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<UsageEvent>> {
        if end <= start {
            return Ok(Vec::new());
        }

        let events = self.events.read().await;
        Ok(events
            .range((Included((start, 0)), Excluded((end, 0))))
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut events = self.events.write().await;
        let kept = events.split_off(&(cutoff, 0));
        let removed = events.len() as u64;
        *events = kept;
        Ok(removed)
    }
}

/// In-memory rollup store keyed by aggregate identity.
pub struct MemoryRollupStore {
    aggregates: DashMap<AggregateId, WindowAggregate>,
}

impl MemoryRollupStore {
    pub fn new() -> Self {
        Self {
            aggregates: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

impl Default for MemoryRollupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RollupStore for MemoryRollupStore {
    async fn upsert(&self, aggregate: WindowAggregate) -> StorageResult<()> {
        self.aggregates.insert(aggregate.id(), aggregate);
        Ok(())
    }

    async fn get(&self, id: &AggregateId) -> StorageResult<Option<WindowAggregate>> {
        Ok(self.aggregates.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_window(
        &self,
        granularity: Granularity,
        window_key: &str,
    ) -> StorageResult<Vec<WindowAggregate>> {
        Ok(self
            .aggregates
            .iter()
            .filter(|entry| {
                let id = entry.key();
                id.granularity == granularity && id.window_key == window_key
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn prune_before(
        &self,
        granularity: Granularity,
        cutoff_key: &str,
    ) -> StorageResult<u64> {
        let mut removed = 0u64;
        self.aggregates.retain(|id, _| {
            let expired = id.granularity == granularity && id.window_key.as_str() < cutoff_key;
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GroupKey;
    use chrono::{Duration, TimeZone};

    fn event(user: &str, tokens: u64, ts: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            user_id: user.to_string(),
            resource_id: "srv-a".to_string(),
            token_count: tokens,
            timestamp: ts,
        }
    }

    fn aggregate(granularity: Granularity, key: &str, group: GroupKey, total: u64) -> WindowAggregate {
        WindowAggregate {
            granularity,
            window_key: key.to_string(),
            group_key: group,
            total_count: total,
        }
    }

    #[tokio::test]
    async fn test_scan_range_is_half_open() {
        let store = MemoryRawEventStore::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let end = start + Duration::minutes(1);

        store.append(event("u1", 1, start - Duration::seconds(1))).await.unwrap();
        store.append(event("u2", 2, start)).await.unwrap();
        store.append(event("u3", 3, end - Duration::seconds(1))).await.unwrap();
        store.append(event("u4", 4, end)).await.unwrap();

        let scanned = store.scan_range(start, end).await.unwrap();
        let users: Vec<_> = scanned.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(users, vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn test_scan_range_keeps_duplicate_timestamps() {
        let store = MemoryRawEventStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 30).unwrap();

        store.append(event("u1", 5, t)).await.unwrap();
        store.append(event("u1", 5, t)).await.unwrap();

        let scanned = store
            .scan_range(t - Duration::seconds(1), t + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(scanned.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_empty_or_inverted_range() {
        let store = MemoryRawEventStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        store.append(event("u1", 5, t)).await.unwrap();

        assert!(store.scan_range(t, t).await.unwrap().is_empty());
        assert!(
            store
                .scan_range(t, t - Duration::minutes(5))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_prune_before() {
        let store = MemoryRawEventStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();

        store.append(event("u1", 1, t - Duration::days(2))).await.unwrap();
        store.append(event("u2", 2, t - Duration::days(1))).await.unwrap();
        store.append(event("u3", 3, t)).await.unwrap();

        let removed = store.prune_before(t - Duration::hours(25)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_identity() {
        let store = MemoryRollupStore::new();
        let key = GroupKey::User("u1".to_string());

        store
            .upsert(aggregate(Granularity::Day, "2025-03-03", key.clone(), 10))
            .await
            .unwrap();
        store
            .upsert(aggregate(Granularity::Day, "2025-03-03", key.clone(), 25))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let id = AggregateId {
            granularity: Granularity::Day,
            window_key: "2025-03-03".to_string(),
            group_key: key,
        };
        assert_eq!(store.get(&id).await.unwrap().unwrap().total_count, 25);
    }

    #[tokio::test]
    async fn test_list_window_filters_granularity_and_key() {
        let store = MemoryRollupStore::new();

        store
            .upsert(aggregate(Granularity::Day, "2025-03-03", GroupKey::Global, 22))
            .await
            .unwrap();
        store
            .upsert(aggregate(
                Granularity::Day,
                "2025-03-03",
                GroupKey::User("u1".to_string()),
                22,
            ))
            .await
            .unwrap();
        store
            .upsert(aggregate(Granularity::Day, "2025-03-04", GroupKey::Global, 5))
            .await
            .unwrap();
        store
            .upsert(aggregate(Granularity::Week, "2025-03-03", GroupKey::Global, 99))
            .await
            .unwrap();

        let rows = store.list_window(Granularity::Day, "2025-03-03").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.window_key == "2025-03-03"));
        assert!(rows.iter().all(|r| r.granularity == Granularity::Day));
    }

    #[tokio::test]
    async fn test_rollup_prune_before_respects_granularity() {
        let store = MemoryRollupStore::new();

        store
            .upsert(aggregate(Granularity::Day, "2025-02-01", GroupKey::Global, 1))
            .await
            .unwrap();
        store
            .upsert(aggregate(Granularity::Day, "2025-03-03", GroupKey::Global, 2))
            .await
            .unwrap();
        store
            .upsert(aggregate(Granularity::Week, "2025-02-01", GroupKey::Global, 3))
            .await
            .unwrap();

        let removed = store.prune_before(Granularity::Day, "2025-03-01").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }
}
