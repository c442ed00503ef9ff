// In-memory pool state: cache + index + GC, all synchronous

use super::cache::{FetchGroupCache, SerializedGroup};
use super::gc::{GarbageCollector, GcReport};
use super::index::TimestampIndex;
use super::timestamps::{align_up, format_timestamp, resolution_at, Clock};
use super::types::{FetchGroup, Interval};
use crate::config::PoolConfig;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What one insertion batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub new_intervals: usize,
    pub touched_intervals: usize,
    pub gc: GcReport,
}

impl InsertReport {
    pub fn changed(&self) -> bool {
        self.new_intervals > 0 || self.touched_intervals > 0 || self.gc.changed
    }
}

#[derive(Debug)]
pub struct PoolState {
    cache: FetchGroupCache,
    index: TimestampIndex,
    gc: GarbageCollector,
}

impl PoolState {
    pub fn new(clock: Arc<dyn Clock>, config: &PoolConfig) -> Self {
        Self {
            cache: FetchGroupCache::new(
                clock,
                config.protected_days_before,
                config.protected_days_after,
            ),
            index: TimestampIndex::new(),
            gc: GarbageCollector::new(config.max_cached_intervals),
        }
    }

    pub fn cache(&self) -> &FetchGroupCache {
        &self.cache
    }

    pub fn index(&self) -> &TimestampIndex {
        &self.index
    }

    /// Insert one fetch result
    ///
    /// Timestamps already indexed are touched: the existing shared record goes
    /// into a new group stamped `fetched_at` and the index is re-pointed, which
    /// leaves a dead copy behind for the GC. Unknown timestamps form their own
    /// new group. Repeated timestamps within `intervals` collapse to the last one.
    pub fn add_intervals(&mut self, intervals: Vec<Interval>, fetched_at: NaiveDateTime) -> InsertReport {
        if intervals.is_empty() {
            return InsertReport::default();
        }

        let by_key: BTreeMap<String, Interval> = intervals
            .into_iter()
            .map(|interval| (interval.key(), interval))
            .collect();

        let mut touched: Vec<(String, Arc<Interval>)> = Vec::new();
        let mut fresh: Vec<Arc<Interval>> = Vec::new();

        for (key, interval) in by_key {
            let existing = self
                .index
                .get_normalized(&key)
                .and_then(|location| self.cache.interval_at(location))
                .cloned();

            match existing {
                Some(shared) => touched.push((key, shared)),
                None => fresh.push(Arc::new(interval)),
            }
        }

        let mut report = InsertReport {
            new_intervals: fresh.len(),
            touched_intervals: touched.len(),
            ..Default::default()
        };

        if !touched.is_empty() {
            let records: Vec<Arc<Interval>> = touched.iter().map(|(_, i)| Arc::clone(i)).collect();
            let group_id = self.cache.add_group(records, fetched_at);
            self.index.batch_update(
                touched
                    .iter()
                    .enumerate()
                    .map(|(position, (key, _))| (key.as_str(), group_id, position)),
            );
        }

        if !fresh.is_empty() {
            let group_id = self.cache.add_group(fresh.clone(), fetched_at);
            for (position, interval) in fresh.iter().enumerate() {
                self.index.add(interval, group_id, position);
            }
        }

        report.gc = self.gc.run(&mut self.cache, &mut self.index);
        report
    }

    pub fn run_gc(&mut self) -> GcReport {
        self.gc.run(&mut self.cache, &mut self.index)
    }

    pub fn lookup(&self, timestamp: &str) -> Option<&Arc<Interval>> {
        self.index
            .get(timestamp)
            .and_then(|location| self.cache.interval_at(location))
    }

    /// Cached intervals starting in `[start, end)`, by index point lookups
    ///
    /// Walks the interval boundaries of the range, stepping by the resolution in
    /// effect at each one.
    pub fn intervals_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<Arc<Interval>> {
        let mut found = Vec::new();
        let mut cursor = align_up(start);

        while cursor < end {
            let key = format_timestamp(cursor);
            if let Some(interval) = self
                .index
                .get_normalized(&key)
                .and_then(|location| self.cache.interval_at(location))
            {
                found.push(Arc::clone(interval));
            }
            cursor += resolution_at(cursor);
        }

        found
    }

    /// Live intervals grouped as stored, dead copies left out
    pub fn live_groups(&self) -> Vec<SerializedGroup> {
        self.cache
            .groups()
            .iter()
            .enumerate()
            .filter_map(|(group_id, group)| {
                let intervals: Vec<Interval> = group
                    .intervals
                    .iter()
                    .enumerate()
                    .filter(|(position, interval)| self.index.is_live(interval, group_id, *position))
                    .map(|(_, interval)| (**interval).clone())
                    .collect();

                if intervals.is_empty() {
                    None
                } else {
                    Some(SerializedGroup {
                        fetched_at: format_timestamp(group.fetched_at),
                        intervals,
                    })
                }
            })
            .collect()
    }

    /// Replace everything with restored groups, then rebuild the index and collect
    pub fn load_groups(&mut self, groups: Vec<FetchGroup>) -> GcReport {
        self.cache.replace_groups(groups);
        self.index.rebuild(self.cache.groups());
        self.run_gc()
    }

    pub fn dead_count(&self) -> usize {
        self.cache.total_interval_count() - self.live_count()
    }

    pub fn live_count(&self) -> usize {
        self.cache
            .groups()
            .iter()
            .enumerate()
            .map(|(group_id, group)| {
                group
                    .intervals
                    .iter()
                    .enumerate()
                    .filter(|(position, interval)| self.index.is_live(interval, group_id, *position))
                    .count()
            })
            .sum()
    }

    pub fn protected_count(&self) -> usize {
        let range = self.cache.protected_range();
        self.cache
            .groups()
            .iter()
            .flat_map(|group| group.intervals.iter())
            .filter(|interval| range.contains_key(&interval.key()))
            .count()
    }

    pub fn max_intervals(&self) -> usize {
        self.gc.max_intervals()
    }
}
