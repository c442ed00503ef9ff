// End-to-end pool behavior against a scripted source and in-memory stores

use super::*;
use crate::config::PoolConfig;
use crate::errors::{PoolError, SourceError, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use parking_lot::Mutex;
use std::sync::Arc;

const SUBJECT: &str = "home-1";
const NOW: &str = "2025-11-10T12:00:00";

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
}

/// Generates one interval per boundary of the requested range and records calls
struct ScriptedSource {
    calls: Mutex<Vec<(NaiveDateTime, NaiveDateTime)>>,
    fail_on_call: Option<usize>,
    price: f64,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Self::with(None, 0.25)
    }

    fn with(fail_on_call: Option<usize>, price: f64) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_on_call,
            price,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn calls(&self) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        self.calls.lock().clone()
    }

    async fn serve(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<Interval>, SourceError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push((start, end));
            calls.len()
        };
        tokio::task::yield_now().await;

        if self.fail_on_call == Some(call) {
            return Err(SourceError::Network("connection reset".to_string()));
        }

        let mut intervals = Vec::new();
        let mut cursor = align_up(start);
        while cursor < end {
            intervals.push(Interval::new(
                format_timestamp(cursor),
                self.price,
                self.price * 0.7,
                self.price * 0.3,
            ));
            cursor += resolution_at(cursor);
        }
        Ok(intervals)
    }
}

#[async_trait]
impl IntervalSource for ScriptedSource {
    async fn fetch_recent(
        &self,
        _subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Interval>, SourceError> {
        self.serve(start, end).await
    }

    async fn fetch_historical(
        &self,
        _subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Interval>, SourceError> {
        self.serve(start, end).await
    }
}

struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn load(&self, _subject_id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn save(&self, _subject_id: &str, _bytes: &[u8]) -> StoreResult<()> {
        Err(StoreError::Backend("read-only filesystem".to_string()))
    }

    async fn remove(&self, _subject_id: &str) -> StoreResult<()> {
        Ok(())
    }
}

struct Harness {
    pool: IntervalPool,
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    metrics: Arc<PoolMetrics>,
}

fn harness_with(config: PoolConfig, source: Arc<ScriptedSource>, store: Arc<MemoryStore>) -> Harness {
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let metrics = Arc::new(PoolMetrics::new());
    let pool = IntervalPool::builder(SUBJECT, source.clone(), store.clone())
        .config(config)
        .clock(clock.clone())
        .wall_clock(clock.clone())
        .observer(metrics.clone())
        .build()
        .unwrap();

    Harness {
        pool,
        source,
        store,
        clock,
        metrics,
    }
}

fn harness() -> Harness {
    harness_with(PoolConfig::default(), ScriptedSource::new(), Arc::new(MemoryStore::new()))
}

fn hourly(start: &str, count: usize) -> Vec<Interval> {
    let start = ts(start);
    (0..count)
        .map(|h| Interval::new(format_timestamp(start + Duration::hours(h as i64)), 0.1, 0.07, 0.03))
        .collect()
}

fn quarters(start: &str, count: usize) -> Vec<Interval> {
    let start = ts(start);
    (0..count)
        .map(|q| {
            Interval::new(
                format_timestamp(start + Duration::minutes(15 * q as i64)),
                0.2,
                0.14,
                0.06,
            )
        })
        .collect()
}

fn values(intervals: &[Arc<Interval>]) -> Vec<Interval> {
    intervals.iter().map(|i| (**i).clone()).collect()
}

#[tokio::test]
async fn test_union_of_two_cached_ranges_fetches_only_the_gap() {
    let h = harness();

    h.pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    h.pool
        .get(SUBJECT, ts("2025-10-20T12:00:00"), ts("2025-10-20T18:00:00"))
        .await
        .unwrap();
    assert_eq!(h.source.call_count(), 2);

    let all = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T18:00:00"))
        .await
        .unwrap();

    assert_eq!(h.source.call_count(), 3);
    assert_eq!(
        h.source.calls()[2],
        (ts("2025-10-20T06:00:00"), ts("2025-10-20T12:00:00"))
    );
    assert_eq!(all.len(), 72);
    assert_eq!(all[0].key(), "2025-10-20T00:00:00");
    assert_eq!(all[71].key(), "2025-10-20T17:45:00");
}

#[tokio::test]
async fn test_cached_range_makes_no_calls() {
    let h = harness();
    let first = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00"))
        .await
        .unwrap();
    let second = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00"))
        .await
        .unwrap();

    assert_eq!(h.source.call_count(), 1);
    assert_eq!(values(&first), values(&second));
    assert_eq!(h.metrics.snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_sub_range_of_cached_range_is_a_hit() {
    let h = harness();
    h.pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00"))
        .await
        .unwrap();

    let slice = h
        .pool
        .get(SUBJECT, ts("2025-10-20T14:07:00"), ts("2025-10-20T15:00:00"))
        .await
        .unwrap();

    assert_eq!(h.source.call_count(), 1);
    let keys: Vec<String> = slice.iter().map(|i| i.key()).collect();
    assert_eq!(
        keys,
        vec!["2025-10-20T14:15:00", "2025-10-20T14:30:00", "2025-10-20T14:45:00"]
    );
}

#[tokio::test]
async fn test_repeated_touches_keep_exactly_n_records() {
    let h = harness();
    let n = 16;

    for k in 0..5 {
        h.pool
            .add_intervals(quarters("2025-10-20T00:00:00", n), ts(NOW) + Duration::minutes(k));
    }

    let stats = h.pool.stats();
    assert_eq!(stats.intervals, n);
    assert_eq!(stats.live_intervals, n);
    assert_eq!(stats.dead_intervals, 0);
    assert_eq!(stats.index_entries, n);
    assert_eq!(stats.groups, 1);
    assert_eq!(stats.newest_fetched_at, Some(ts(NOW) + Duration::minutes(4)));

    h.pool.flush().await.unwrap();
    let bytes = h.store.get(SUBJECT).unwrap();
    let snapshot = PersistedState::decode(&bytes, SUBJECT).unwrap();
    let stored: usize = snapshot.fetch_groups.iter().map(|g| g.intervals.len()).sum();
    assert_eq!(stored, n);

    let touched = h.metrics.snapshot().touched_intervals;
    assert_eq!(touched, (n * 4) as u64);
}

#[tokio::test]
async fn test_touch_preserves_record_identity_and_payload() {
    let h = harness();
    let before = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T01:00:00"))
        .await
        .unwrap();

    let mut refetched = quarters("2025-10-20T00:00:00", 4);
    for interval in &mut refetched {
        interval.total = 9.99;
    }
    let report = h.pool.add_intervals(refetched, ts(NOW) + Duration::hours(1));
    assert_eq!(report.touched_intervals, 4);

    let after = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T01:00:00"))
        .await
        .unwrap();

    for (old, new) in before.iter().zip(after.iter()) {
        assert!(Arc::ptr_eq(old, new));
    }
    assert_eq!(after[0].total, 0.25);
}

#[tokio::test]
async fn test_far_past_group_is_evicted_whole() {
    let config = PoolConfig {
        max_cached_intervals: 10,
        ..Default::default()
    };
    let h = harness_with(config, ScriptedSource::new(), Arc::new(MemoryStore::new()));

    let report = h.pool.add_intervals(hourly("2025-06-01T00:00:00", 24), ts(NOW));

    assert_eq!(report.new_intervals, 24);
    assert_eq!(report.gc.groups_evicted, 1);
    assert_eq!(report.gc.intervals_evicted, 24);
    assert_eq!(h.pool.stats().intervals, 0);
}

#[tokio::test]
async fn test_eviction_spares_protected_groups() {
    let config = PoolConfig {
        max_cached_intervals: 10,
        ..Default::default()
    };
    let h = harness_with(config, ScriptedSource::new(), Arc::new(MemoryStore::new()));

    h.pool
        .add_intervals(quarters("2025-11-10T00:00:00", 8), ts("2025-11-10T06:00:00"));
    h.pool.add_intervals(hourly("2025-06-01T00:00:00", 24), ts(NOW));

    let stats = h.pool.stats();
    assert_eq!(stats.intervals, 8);
    assert_eq!(stats.protected_intervals, 8);
    assert_eq!(stats.oldest_fetched_at, Some(ts("2025-11-10T06:00:00")));
}

#[tokio::test]
async fn test_oversized_protected_pool_is_flagged() {
    let config = PoolConfig {
        max_cached_intervals: 4,
        ..Default::default()
    };
    let h = harness_with(config, ScriptedSource::new(), Arc::new(MemoryStore::new()));

    let report = h
        .pool
        .add_intervals(quarters("2025-11-09T00:00:00", 8), ts(NOW));

    assert!(report.gc.capacity_exceeded);
    assert_eq!(h.pool.stats().intervals, 8);
    assert_eq!(h.metrics.snapshot().capacity_warnings, 1);
}

#[tokio::test]
async fn test_protection_window_moves_with_the_clock() {
    let config = PoolConfig {
        max_cached_intervals: 4,
        ..Default::default()
    };
    let h = harness_with(config, ScriptedSource::new(), Arc::new(MemoryStore::new()));

    h.pool
        .add_intervals(quarters("2025-11-09T00:00:00", 8), ts(NOW));
    assert_eq!(h.pool.stats().intervals, 8);

    // Three days later the group is outside the window and goes on the next pass
    h.clock.advance(Duration::days(3));
    h.pool
        .add_intervals(quarters("2025-11-13T00:00:00", 2), h.clock.now());

    let stats = h.pool.stats();
    assert_eq!(stats.intervals, 2);
    assert_eq!(stats.protected_intervals, 2);
}

#[tokio::test]
async fn test_restore_serves_cached_ranges_without_fetching() {
    let store = Arc::new(MemoryStore::new());
    let first = harness_with(PoolConfig::default(), ScriptedSource::new(), store.clone());

    let original = first
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-22T00:00:00"))
        .await
        .unwrap();
    first.pool.flush().await.unwrap();

    let source = ScriptedSource::new();
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let restored = IntervalPool::builder(SUBJECT, source.clone(), store.clone())
        .clock(clock.clone())
        .wall_clock(clock)
        .build_restored()
        .await
        .unwrap();

    let again = restored
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-22T00:00:00"))
        .await
        .unwrap();

    assert_eq!(source.call_count(), 0);
    assert_eq!(values(&original), values(&again));
}

#[tokio::test]
async fn test_corrupt_or_foreign_state_starts_empty() {
    for bytes in [
        b"not json at all".to_vec(),
        br#"{"homes":{"home-1":{"fetchGroups":[]}}}"#.to_vec(),
        br#"{"version":1,"subjectId":"home-2","fetchGroups":[]}"#.to_vec(),
        br#"{"version":2,"subjectId":"home-1","fetchGroups":[]}"#.to_vec(),
    ] {
        let store = Arc::new(MemoryStore::new());
        store.insert(SUBJECT, bytes);

        let source = ScriptedSource::new();
        let pool = IntervalPool::builder(SUBJECT, source.clone(), store)
            .build_restored()
            .await
            .unwrap();
        assert_eq!(pool.stats().intervals, 0);
    }
}

#[tokio::test]
async fn test_gap_across_cutover_fetched_as_two_requests() {
    let h = harness();

    let intervals = h
        .pool
        .get(SUBJECT, ts("2025-09-30T12:00:00"), ts("2025-10-01T12:00:00"))
        .await
        .unwrap();

    assert_eq!(
        h.source.calls(),
        vec![
            (ts("2025-09-30T12:00:00"), ts("2025-10-01T00:00:00")),
            (ts("2025-10-01T00:00:00"), ts("2025-10-01T12:00:00")),
        ]
    );
    // 12 hourly + 48 quarter-hourly
    assert_eq!(intervals.len(), 60);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_locally() {
    let h = harness();

    let inverted = h
        .pool
        .get(SUBJECT, ts("2025-10-21T00:00:00"), ts("2025-10-20T00:00:00"))
        .await;
    let empty = h
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T00:00:00"))
        .await;
    let no_subject = h
        .pool
        .get("  ", ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00"))
        .await;
    let other_subject = h
        .pool
        .get("home-2", ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00"))
        .await;

    for result in [inverted, empty, no_subject, other_subject] {
        assert!(matches!(result, Err(PoolError::Validation(_))));
    }
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_upstream_error_passes_through_and_keeps_earlier_gaps() {
    let h = harness_with(
        PoolConfig::default(),
        ScriptedSource::with(Some(2), 0.25),
        Arc::new(MemoryStore::new()),
    );

    let err = h
        .pool
        .get(SUBJECT, ts("2025-09-30T12:00:00"), ts("2025-10-01T12:00:00"))
        .await
        .unwrap_err();

    assert_eq!(
        err.as_upstream(),
        Some(&SourceError::Network("connection reset".to_string()))
    );
    assert_eq!(h.pool.stats().intervals, 12);
    assert!(h.pool.is_save_pending());

    let cached = h
        .pool
        .get(SUBJECT, ts("2025-09-30T12:00:00"), ts("2025-10-01T00:00:00"))
        .await
        .unwrap();
    assert_eq!(cached.len(), 12);
    assert_eq!(h.source.call_count(), 2);
}

#[tokio::test]
async fn test_storage_failures_never_reach_callers() {
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let metrics = Arc::new(PoolMetrics::new());
    let pool = IntervalPool::builder(SUBJECT, ScriptedSource::new(), Arc::new(FailingStore))
        .config(PoolConfig {
            save_debounce_ms: 1,
            ..Default::default()
        })
        .clock(clock.clone())
        .wall_clock(clock)
        .observer(metrics.clone())
        .build()
        .unwrap();

    let intervals = pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert_eq!(intervals.len(), 24);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(metrics.snapshot().saves_failed, 1);

    assert!(pool.flush().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_changes_within_debounce_window_coalesce() {
    let h = harness();

    h.pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert!(h.pool.is_save_pending());

    tokio::time::sleep(std::time::Duration::from_millis(4_000)).await;
    h.pool
        .get(SUBJECT, ts("2025-10-20T06:00:00"), ts("2025-10-20T12:00:00"))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(8_000)).await;
    assert_eq!(h.store.save_count(), 0);

    tokio::time::sleep(std::time::Duration::from_millis(3_000)).await;
    assert_eq!(h.store.save_count(), 1);
    assert!(!h.pool.is_save_pending());
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_does_not_schedule_a_save() {
    let h = harness();
    h.pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(11_000)).await;
    assert_eq!(h.store.save_count(), 1);

    h.pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert!(!h.pool.is_save_pending());
}

#[tokio::test]
async fn test_concurrent_gets_fetch_each_gap_once() {
    let h = harness();

    let (a, b) = tokio::join!(
        h.pool
            .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00")),
        h.pool
            .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-21T00:00:00")),
    );

    assert_eq!(a.unwrap().len(), 96);
    assert_eq!(b.unwrap().len(), 96);
    assert_eq!(h.source.call_count(), 1);
}

#[tokio::test]
async fn test_router_splits_recent_and_historical_by_wall_clock() {
    let h = harness();

    // Wall clock says 2025-11-10, so the recent endpoint starts at 2025-11-08
    h.pool
        .get(SUBJECT, ts("2025-11-07T00:00:00"), ts("2025-11-09T00:00:00"))
        .await
        .unwrap();

    assert_eq!(
        h.source.calls(),
        vec![
            (ts("2025-11-07T00:00:00"), ts("2025-11-08T00:00:00")),
            (ts("2025-11-08T00:00:00"), ts("2025-11-09T00:00:00")),
        ]
    );
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let registry = PoolRegistry::new(ScriptedSource::new(), store.clone(), PoolConfig::default())
        .with_clock(clock.clone())
        .with_wall_clock(clock);

    let a = registry.get_or_create("home-b").await.unwrap();
    let again = registry.get_or_create("home-b").await.unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    registry.get_or_create("home-a").await.unwrap();
    assert!(registry.get_or_create("").await.is_err());

    assert_eq!(registry.subjects().await, vec!["home-a", "home-b"]);

    a.get("home-b", ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert_eq!(registry.flush_all().await, 0);
    assert!(store.get("home-b").is_some());

    assert!(registry.remove("home-b").await.unwrap());
    assert!(store.get("home-b").is_none());
    assert!(registry.get("home-b").await.is_none());
    assert!(!registry.remove("home-b").await.unwrap());
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_registry_restores_on_first_access() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(ts(NOW)));

    let seeded = harness_with(PoolConfig::default(), ScriptedSource::new(), store.clone());
    seeded
        .pool
        .get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    seeded.pool.flush().await.unwrap();

    let source = ScriptedSource::new();
    let registry = PoolRegistry::new(source.clone(), store, PoolConfig::default())
        .with_clock(clock.clone())
        .with_wall_clock(clock);
    let pool = registry.get_or_create(SUBJECT).await.unwrap();

    assert_eq!(pool.stats().intervals, 24);
    pool.get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert_eq!(source.call_count(), 0);
}

#[test]
fn test_add_intervals_outside_runtime_inserts_without_saving() {
    let h = harness();

    let report = h
        .pool
        .add_intervals(quarters("2025-11-10T00:00:00", 8), ts(NOW));

    assert_eq!(report.new_intervals, 8);
    assert_eq!(h.pool.stats().intervals, 8);
    assert!(!h.pool.is_save_pending());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_removed_subject_is_not_written_back() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let registry = PoolRegistry::new(ScriptedSource::new(), store.clone(), PoolConfig::default())
        .with_clock(clock.clone())
        .with_wall_clock(clock);

    let held = registry.get_or_create(SUBJECT).await.unwrap();
    held.get(SUBJECT, ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    assert!(held.is_save_pending());

    assert!(registry.remove(SUBJECT).await.unwrap());
    assert!(held.is_closed());

    // The old handle still serves requests
    let intervals = held
        .get(SUBJECT, ts("2025-10-20T06:00:00"), ts("2025-10-20T12:00:00"))
        .await
        .unwrap();
    assert_eq!(intervals.len(), 24);
    held.flush().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;

    assert!(store.get(SUBJECT).is_none());
    assert_eq!(store.save_count(), 0);

    let fresh = registry.get_or_create(SUBJECT).await.unwrap();
    assert!(!Arc::ptr_eq(&held, &fresh));
    assert_eq!(fresh.stats().intervals, 0);
}

#[tokio::test]
async fn test_similar_subject_ids_persist_separately() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(ts(NOW)));
    let open = |source: Arc<ScriptedSource>| {
        PoolRegistry::new(
            source,
            Arc::new(JsonFileStore::new(dir.path(), "interval_pool")),
            PoolConfig::default(),
        )
        .with_clock(clock.clone())
        .with_wall_clock(clock.clone())
    };

    let registry = open(ScriptedSource::new());
    registry
        .get_or_create("home/1")
        .await
        .unwrap()
        .get("home/1", ts("2025-10-20T00:00:00"), ts("2025-10-20T06:00:00"))
        .await
        .unwrap();
    registry
        .get_or_create("home_1")
        .await
        .unwrap()
        .get("home_1", ts("2025-10-20T00:00:00"), ts("2025-10-20T12:00:00"))
        .await
        .unwrap();
    assert_eq!(registry.flush_all().await, 0);

    let source = ScriptedSource::new();
    let reopened = open(source.clone());
    assert_eq!(reopened.get_or_create("home/1").await.unwrap().stats().intervals, 24);
    assert_eq!(reopened.get_or_create("home_1").await.unwrap().stats().intervals, 48);
    assert_eq!(source.call_count(), 0);
}

