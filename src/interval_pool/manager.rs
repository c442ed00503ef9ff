/// Pool manager: the per-subject façade over cache, index, GC, fetcher and saver
///
/// One `IntervalPool` owns everything for one subject. `get` calls are
/// serialized by an async request lock held across detect/fetch/insert, so two
/// concurrent callers never fetch the same gap twice. The in-memory state sits
/// behind a synchronous lock that is only taken between awaits.
use super::fetcher::Fetcher;
use super::gaps::GapDetector;
use super::observer::{NoopObserver, PoolObserver};
use super::persistence::{load_state, DebouncedSaver, StateStore};
use super::router::{IntervalSource, Router};
use super::state::{InsertReport, PoolState};
use super::timestamps::{Clock, SystemClock};
use super::types::{Interval, PoolStats, TimeRange};
use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult, StoreResult};
use crate::logger::{self, LogTag};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct IntervalPool {
    subject_id: String,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    fetcher: Fetcher,
    gap_detector: GapDetector,
    request_lock: tokio::sync::Mutex<()>,
    saver: DebouncedSaver,
    observer: Arc<dyn PoolObserver>,
}

/// Builder for [`IntervalPool`]
pub struct IntervalPoolBuilder {
    subject_id: String,
    source: Arc<dyn IntervalSource>,
    store: Arc<dyn StateStore>,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    wall_clock: Arc<dyn Clock>,
    observer: Arc<dyn PoolObserver>,
}

impl IntervalPoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock for fetch times and the protected window
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Clock for the router boundary. Defaults to the system clock even when a
    /// simulated pool clock is set.
    pub fn wall_clock(mut self, wall_clock: Arc<dyn Clock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PoolObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build an empty pool
    pub fn build(self) -> PoolResult<IntervalPool> {
        if self.subject_id.trim().is_empty() {
            return Err(PoolError::Validation("subject id is empty".to_string()));
        }
        self.config.validate().map_err(PoolError::Validation)?;

        let state = Arc::new(Mutex::new(PoolState::new(self.clock.clone(), &self.config)));
        let router = Router::new(self.source, self.config.recent_window_days_back)
            .with_wall_clock(self.wall_clock);
        let saver = DebouncedSaver::new(
            self.subject_id.clone(),
            self.store,
            Arc::clone(&state),
            self.config.save_debounce(),
            Arc::clone(&self.observer),
        );

        Ok(IntervalPool {
            gap_detector: GapDetector::new(self.config.gap_tolerance()),
            fetcher: Fetcher::new(router, self.clock),
            subject_id: self.subject_id,
            config: self.config,
            state,
            request_lock: tokio::sync::Mutex::new(()),
            saver,
            observer: self.observer,
        })
    }

    /// Build a pool and load whatever the store holds for the subject
    ///
    /// Unreadable or rejected state is logged and the pool starts empty.
    pub async fn build_restored(self) -> PoolResult<IntervalPool> {
        let store = Arc::clone(&self.store);
        let pool = self.build()?;
        pool.restore_from(store.as_ref()).await;
        Ok(pool)
    }
}

impl IntervalPool {
    pub fn builder(
        subject_id: impl Into<String>,
        source: Arc<dyn IntervalSource>,
        store: Arc<dyn StateStore>,
    ) -> IntervalPoolBuilder {
        IntervalPoolBuilder {
            subject_id: subject_id.into(),
            source,
            store,
            config: PoolConfig::default(),
            clock: Arc::new(SystemClock),
            wall_clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn restore_from(&self, store: &dyn StateStore) {
        match load_state(store, &self.subject_id).await {
            Ok(Some(groups)) => {
                let group_count = groups.len();
                let (gc, live) = {
                    let mut state = self.state.lock();
                    let gc = state.load_groups(groups);
                    (gc, state.live_count())
                };
                logger::info(
                    LogTag::Persist,
                    &format!(
                        "Restored subject={} groups={} intervals={}",
                        self.subject_id, group_count, live
                    ),
                );
                if gc.changed {
                    self.observer.on_gc(&self.subject_id, &gc);
                    self.saver.schedule();
                }
            }
            Ok(None) => {
                logger::debug(
                    LogTag::Persist,
                    &format!("No stored state for subject={}", self.subject_id),
                );
            }
            Err(e) => {
                logger::warning(
                    LogTag::Persist,
                    &format!(
                        "Discarding stored state for subject={}: {}",
                        self.subject_id, e
                    ),
                );
            }
        }
    }

    /// Intervals starting in `[start, end)`, fetching whatever is missing
    ///
    /// Upstream errors abort the call unchanged. Gaps fetched before the
    /// failure stay cached.
    pub async fn get(
        &self,
        subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> PoolResult<Vec<Arc<Interval>>> {
        self.validate_request(subject_id, start, end)?;
        let range = TimeRange::new(start, end);

        let _request = self.request_lock.lock().await;

        let cached = self.state.lock().intervals_in_range(start, end);
        let gaps = self.gap_detector.detect_gaps(&cached, start, end);

        if gaps.is_empty() {
            logger::debug(
                LogTag::Pool,
                &format!(
                    "Cache hit subject={} range={} intervals={}",
                    self.subject_id,
                    range,
                    cached.len()
                ),
            );
            self.observer.on_cache_hit(&self.subject_id, &range);
            return Ok(cached);
        }

        logger::debug(
            LogTag::Pool,
            &format!(
                "subject={} range={} cached={} gaps={}",
                self.subject_id,
                range,
                cached.len(),
                gaps.len()
            ),
        );

        let mut changed = false;
        let outcome = self
            .fetcher
            .fetch_missing_ranges(&self.subject_id, &gaps, |intervals, fetched_at| {
                self.observer.on_fetch(&self.subject_id, intervals.len());
                let report = self.apply(intervals, fetched_at);
                changed |= report.changed();
            })
            .await;

        if changed {
            self.saver.schedule();
        }

        let summary = outcome?;
        logger::debug(
            LogTag::Pool,
            &format!(
                "subject={} fetched {} intervals in {} requests",
                self.subject_id, summary.intervals, summary.requests
            ),
        );

        Ok(self.state.lock().intervals_in_range(start, end))
    }

    /// Insert intervals fetched elsewhere, stamped with `fetched_at`
    ///
    /// Safe to call without a tokio runtime. The insert still happens but no
    /// save is scheduled; the change is written by the next scheduled save or
    /// an explicit `flush`.
    pub fn add_intervals(&self, intervals: Vec<Interval>, fetched_at: NaiveDateTime) -> InsertReport {
        let report = self.apply(intervals, fetched_at);
        if report.changed() {
            self.saver.schedule();
        }
        report
    }

    fn apply(&self, intervals: Vec<Interval>, fetched_at: NaiveDateTime) -> InsertReport {
        let (report, ceiling) = {
            let mut state = self.state.lock();
            let report = state.add_intervals(intervals, fetched_at);
            (report, state.max_intervals())
        };

        if report.new_intervals == 0 && report.touched_intervals == 0 {
            return report;
        }

        logger::verbose(
            LogTag::Pool,
            &format!(
                "subject={} new={} touched={} total={}",
                self.subject_id,
                report.new_intervals,
                report.touched_intervals,
                report.gc.total_after
            ),
        );

        self.observer
            .on_insert(&self.subject_id, report.new_intervals, report.touched_intervals);
        self.observer.on_gc(&self.subject_id, &report.gc);
        if report.gc.capacity_exceeded {
            self.observer
                .on_capacity_exceeded(&self.subject_id, report.gc.total_after, ceiling);
        }

        report
    }

    fn validate_request(&self, subject_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> PoolResult<()> {
        if subject_id.trim().is_empty() {
            return Err(PoolError::Validation("subject id is empty".to_string()));
        }
        if subject_id != self.subject_id {
            return Err(PoolError::Validation(format!(
                "pool for subject '{}' cannot serve subject '{}'",
                self.subject_id, subject_id
            )));
        }
        if start >= end {
            return Err(PoolError::Validation(format!(
                "range start {} is not before end {}",
                start, end
            )));
        }
        Ok(())
    }

    /// Cancel the debounce timer and write the current state now
    pub async fn flush(&self) -> StoreResult<()> {
        self.saver.flush().await
    }

    pub fn is_save_pending(&self) -> bool {
        self.saver.is_pending()
    }

    /// Stop persisting this pool
    ///
    /// Waits for a write in progress. Afterwards the pool still serves reads
    /// and fetches but never touches the store again.
    pub async fn close(&self) {
        self.saver.close().await;
        logger::debug(
            LogTag::Pool,
            &format!("Closed persistence for subject={}", self.subject_id),
        );
    }

    pub fn is_closed(&self) -> bool {
        self.saver.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let groups = state.cache().groups();

        PoolStats {
            subject_id: self.subject_id.clone(),
            groups: groups.len(),
            intervals: state.cache().total_interval_count(),
            live_intervals: state.live_count(),
            dead_intervals: state.dead_count(),
            protected_intervals: state.protected_count(),
            index_entries: state.index().len(),
            oldest_fetched_at: groups.iter().map(|g| g.fetched_at).min(),
            newest_fetched_at: groups.iter().map(|g| g.fetched_at).max(),
            save_pending: self.saver.is_pending(),
        }
    }
}

impl std::fmt::Debug for IntervalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalPool")
            .field("subject_id", &self.subject_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
