//! Window arithmetic and the shared scan-and-reduce aggregation routine.
//!
//! The same routine backs both periodic rollups and realtime queries, so a
//! realtime "current window so far" figure and the materialized figure for
//! the same window are computed by the identical algorithm.

use crate::events::UsageEvent;
use crate::storage::{RawEventStore, StorageResult};
use chrono::{DateTime, Datelike, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Window size an aggregate belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Day,
    Week,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Minute, Granularity::Day, Granularity::Week];

    pub fn duration(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Day => Duration::days(1),
            Granularity::Week => Duration::weeks(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Day => "day",
            Granularity::Week => "week",
        }
    }

    /// Round a datetime down to the start of the window containing it.
    /// Days start at midnight UTC, weeks on Monday 00:00 UTC.
    pub fn round_start(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Minute => dt.duration_trunc(Duration::minutes(1)).unwrap_or(dt),
            Granularity::Day => dt
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or(dt),
            Granularity::Week => {
                let days_since_monday = dt.weekday().num_days_from_monday();
                let start_of_week = dt - Duration::days(days_since_monday as i64);
                start_of_week
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
                    .unwrap_or(dt)
            }
        }
    }

    /// The most recently closed window as of `now`.
    pub fn last_closed(&self, now: DateTime<Utc>) -> Window {
        let end = self.round_start(now);
        Window::new(end - self.duration(), end)
    }

    /// Canonical sortable label for the instant, in this granularity's key
    /// space: RFC3339 for minutes, `%Y-%m-%d` for days, the Monday of the
    /// containing week for weeks.
    pub fn instant_key(&self, dt: DateTime<Utc>) -> String {
        match self {
            Granularity::Minute => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            Granularity::Day => dt.format("%Y-%m-%d").to_string(),
            Granularity::Week => self.round_start(dt).format("%Y-%m-%d").to_string(),
        }
    }

    /// Canonical key for a window: minute windows are labeled by their end
    /// boundary, day and week windows by the calendar date they cover.
    pub fn window_key(&self, window: &Window) -> String {
        match self {
            Granularity::Minute => self.instant_key(window.end),
            Granularity::Day | Granularity::Week => self.instant_key(window.start),
        }
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        dt >= self.start && dt < self.end
    }
}

/// Dimension an aggregation is broken down by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    /// Single global sum.
    None,
    User,
    Resource,
}

/// Identity dimension of a stored aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    Global,
    User(String),
    Resource(String),
}

impl GroupKey {
    pub fn label(&self) -> &str {
        match self {
            GroupKey::Global => "GLOBAL",
            GroupKey::User(id) | GroupKey::Resource(id) => id,
        }
    }
}

/// Pure read-and-reduce aggregation over the raw event store.
#[derive(Clone)]
pub struct WindowAggregator {
    raw_events: Arc<dyn RawEventStore>,
}

impl WindowAggregator {
    pub fn new(raw_events: Arc<dyn RawEventStore>) -> Self {
        Self { raw_events }
    }

    /// Fetch all events whose timestamp falls in the window. Read errors
    /// are surfaced to the caller, not retried here.
    pub async fn events_in(&self, window: &Window) -> StorageResult<Vec<UsageEvent>> {
        self.raw_events.scan_range(window.start, window.end).await
    }

    /// Reduce a set of events to one total per group. Token counts are
    /// summed with saturating arithmetic.
    ///
    /// `GroupBy::None` always yields a `GroupKey::Global` entry, zero when
    /// the input is empty; grouped modes only yield groups that occur.
    pub fn reduce(events: &[UsageEvent], group_by: GroupBy) -> HashMap<GroupKey, u64> {
        let mut totals: HashMap<GroupKey, u64> = HashMap::new();

        if let GroupBy::None = group_by {
            totals.insert(GroupKey::Global, 0);
        }

        for event in events {
            let key = match group_by {
                GroupBy::None => GroupKey::Global,
                GroupBy::User => GroupKey::User(event.user_id.clone()),
                GroupBy::Resource => GroupKey::Resource(event.resource_id.clone()),
            };
            let total = totals.entry(key).or_insert(0);
            *total = total.saturating_add(event.token_count);
        }

        totals
    }

    /// Scan the window and reduce in one call.
    pub async fn aggregate(
        &self,
        window: &Window,
        group_by: GroupBy,
    ) -> StorageResult<HashMap<GroupKey, u64>> {
        let events = self.events_in(window).await?;
        Ok(Self::reduce(&events, group_by))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(user: &str, resource: &str, tokens: u64, ts: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            user_id: user.to_string(),
            resource_id: resource.to_string(),
            token_count: tokens,
            timestamp: ts,
        }
    }

    #[test]
    fn test_round_start_minute() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 3, 12, 34, 56).unwrap();
        assert_eq!(
            Granularity::Minute.round_start(dt),
            Utc.with_ymd_and_hms(2025, 3, 3, 12, 34, 0).unwrap()
        );
    }

    #[test]
    fn test_round_start_day() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 3, 12, 34, 56).unwrap();
        assert_eq!(
            Granularity::Day.round_start(dt),
            Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_round_start_week_is_monday() {
        // 2025-03-06 is a Thursday
        let dt = Utc.with_ymd_and_hms(2025, 3, 6, 8, 0, 0).unwrap();
        assert_eq!(
            Granularity::Week.round_start(dt),
            Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
        );

        // A Monday rounds to itself
        let monday = Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap();
        assert_eq!(Granularity::Week.round_start(monday), monday);
    }

    #[test]
    fn test_last_closed_windows() {
        let now = Utc.with_ymd_and_hms(2025, 3, 6, 12, 34, 56).unwrap();

        let minute = Granularity::Minute.last_closed(now);
        assert_eq!(minute.end, Utc.with_ymd_and_hms(2025, 3, 6, 12, 34, 0).unwrap());
        assert_eq!(minute.start, Utc.with_ymd_and_hms(2025, 3, 6, 12, 33, 0).unwrap());

        let day = Granularity::Day.last_closed(now);
        assert_eq!(day.start, Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap());
        assert_eq!(day.end, Utc.with_ymd_and_hms(2025, 3, 6, 0, 0, 0).unwrap());

        let week = Granularity::Week.last_closed(now);
        assert_eq!(week.start, Utc.with_ymd_and_hms(2025, 2, 24, 0, 0, 0).unwrap());
        assert_eq!(week.end, Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_keys() {
        let now = Utc.with_ymd_and_hms(2025, 3, 6, 12, 34, 0).unwrap();

        let minute = Granularity::Minute.last_closed(now);
        assert_eq!(
            Granularity::Minute.window_key(&minute),
            "2025-03-06T12:34:00Z"
        );

        let day = Granularity::Day.last_closed(now);
        assert_eq!(Granularity::Day.window_key(&day), "2025-03-05");

        let week = Granularity::Week.last_closed(now);
        assert_eq!(Granularity::Week.window_key(&week), "2025-02-24");
    }

    #[test]
    fn test_window_keys_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2025, 3, 6, 9, 59, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 3, 6, 10, 0, 0).unwrap();
        assert!(
            Granularity::Minute.instant_key(earlier) < Granularity::Minute.instant_key(later)
        );
    }

    #[test]
    fn test_window_contains_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 3, 12, 1, 0).unwrap();
        let window = Window::new(start, end);

        assert!(window.contains(start));
        assert!(window.contains(end - Duration::seconds(1)));
        assert!(!window.contains(end));
    }

    #[test]
    fn test_reduce_global() {
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let events = vec![
            event("u1", "srv-a", 10, t),
            event("u1", "srv-b", 5, t),
            event("u2", "srv-a", 7, t),
        ];

        let totals = WindowAggregator::reduce(&events, GroupBy::None);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&GroupKey::Global], 22);
    }

    #[test]
    fn test_reduce_empty_global_is_zero() {
        let totals = WindowAggregator::reduce(&[], GroupBy::None);
        assert_eq!(totals[&GroupKey::Global], 0);

        assert!(WindowAggregator::reduce(&[], GroupBy::User).is_empty());
    }

    #[test]
    fn test_reduce_by_user_and_resource() {
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let events = vec![
            event("u1", "srv-a", 10, t),
            event("u1", "srv-b", 5, t),
            event("u2", "srv-a", 7, t),
        ];

        let by_user = WindowAggregator::reduce(&events, GroupBy::User);
        assert_eq!(by_user[&GroupKey::User("u1".to_string())], 15);
        assert_eq!(by_user[&GroupKey::User("u2".to_string())], 7);

        let by_resource = WindowAggregator::reduce(&events, GroupBy::Resource);
        assert_eq!(by_resource[&GroupKey::Resource("srv-a".to_string())], 17);
        assert_eq!(by_resource[&GroupKey::Resource("srv-b".to_string())], 5);
    }

    #[test]
    fn test_reduce_saturates() {
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let events = vec![event("u1", "srv-a", u64::MAX, t), event("u1", "srv-a", 1, t)];

        let totals = WindowAggregator::reduce(&events, GroupBy::None);
        assert_eq!(totals[&GroupKey::Global], u64::MAX);
    }

    #[test]
    fn test_group_key_label() {
        assert_eq!(GroupKey::Global.label(), "GLOBAL");
        assert_eq!(GroupKey::User("u1".to_string()).label(), "u1");
        assert_eq!(GroupKey::Resource("srv-a".to_string()).label(), "srv-a");
    }
}
