// Observation hooks injected into the pool at construction

use super::gc::GcReport;
use super::types::TimeRange;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives pool events. Every method defaults to a no-op.
pub trait PoolObserver: Send + Sync {
    /// A `get` was served without any upstream call
    fn on_cache_hit(&self, _subject_id: &str, _range: &TimeRange) {}

    /// One gap was fetched
    fn on_fetch(&self, _subject_id: &str, _intervals: usize) {}

    /// An insertion batch was applied
    fn on_insert(&self, _subject_id: &str, _new_intervals: usize, _touched_intervals: usize) {}

    fn on_gc(&self, _subject_id: &str, _report: &GcReport) {}

    /// The ceiling could not be honored because every remaining group is protected
    fn on_capacity_exceeded(&self, _subject_id: &str, _total: usize, _ceiling: usize) {}

    fn on_save(&self, _subject_id: &str, _success: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PoolObserver for NoopObserver {}

/// Counting observer
#[derive(Debug, Default)]
pub struct PoolMetrics {
    cache_hits: AtomicU64,
    fetches: AtomicU64,
    intervals_fetched: AtomicU64,
    new_intervals: AtomicU64,
    touched_intervals: AtomicU64,
    gc_runs: AtomicU64,
    dead_removed: AtomicU64,
    groups_evicted: AtomicU64,
    capacity_warnings: AtomicU64,
    saves_ok: AtomicU64,
    saves_failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub fetches: u64,
    pub intervals_fetched: u64,
    pub new_intervals: u64,
    pub touched_intervals: u64,
    pub gc_runs: u64,
    pub dead_removed: u64,
    pub groups_evicted: u64,
    pub capacity_warnings: u64,
    pub saves_ok: u64,
    pub saves_failed: u64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            intervals_fetched: self.intervals_fetched.load(Ordering::Relaxed),
            new_intervals: self.new_intervals.load(Ordering::Relaxed),
            touched_intervals: self.touched_intervals.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            dead_removed: self.dead_removed.load(Ordering::Relaxed),
            groups_evicted: self.groups_evicted.load(Ordering::Relaxed),
            capacity_warnings: self.capacity_warnings.load(Ordering::Relaxed),
            saves_ok: self.saves_ok.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
        }
    }
}

impl PoolObserver for PoolMetrics {
    fn on_cache_hit(&self, _subject_id: &str, _range: &TimeRange) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fetch(&self, _subject_id: &str, intervals: usize) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.intervals_fetched
            .fetch_add(intervals as u64, Ordering::Relaxed);
    }

    fn on_insert(&self, _subject_id: &str, new_intervals: usize, touched_intervals: usize) {
        self.new_intervals
            .fetch_add(new_intervals as u64, Ordering::Relaxed);
        self.touched_intervals
            .fetch_add(touched_intervals as u64, Ordering::Relaxed);
    }

    fn on_gc(&self, _subject_id: &str, report: &GcReport) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.dead_removed
            .fetch_add(report.dead_removed as u64, Ordering::Relaxed);
        self.groups_evicted
            .fetch_add(report.groups_evicted as u64, Ordering::Relaxed);
    }

    fn on_capacity_exceeded(&self, _subject_id: &str, _total: usize, _ceiling: usize) {
        self.capacity_warnings.fetch_add(1, Ordering::Relaxed);
    }

    fn on_save(&self, _subject_id: &str, success: bool) {
        if success {
            self.saves_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.saves_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
