// Garbage collector: dead-copy sweep, empty-group removal, capacity eviction

use super::cache::FetchGroupCache;
use super::index::TimestampIndex;
use super::types::{FetchGroup, IntervalLocation};
use crate::logger::{self, LogTag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one GC pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Anything was removed
    pub changed: bool,
    pub dead_removed: usize,
    pub empty_groups_removed: usize,
    pub groups_evicted: usize,
    pub intervals_evicted: usize,
    /// Still above the ceiling because every remaining group is protected
    pub capacity_exceeded: bool,
    pub total_after: usize,
}

#[derive(Debug, Clone)]
pub struct GarbageCollector {
    max_intervals: usize,
}

impl GarbageCollector {
    pub fn new(max_intervals: usize) -> Self {
        Self { max_intervals }
    }

    pub fn max_intervals(&self) -> usize {
        self.max_intervals
    }

    pub fn run(&self, cache: &mut FetchGroupCache, index: &mut TimestampIndex) -> GcReport {
        let mut report = GcReport::default();

        // Sweep dead copies and empty groups
        let mut survivors: Vec<FetchGroup> = Vec::with_capacity(cache.group_count());
        for (group_id, group) in cache.groups().iter().enumerate() {
            let live: Vec<_> = group
                .intervals
                .iter()
                .enumerate()
                .filter(|(position, interval)| {
                    index.get_normalized(&interval.key())
                        == Some(IntervalLocation::new(group_id, *position))
                })
                .map(|(_, interval)| Arc::clone(interval))
                .collect();

            report.dead_removed += group.len() - live.len();

            if live.is_empty() {
                report.empty_groups_removed += 1;
                continue;
            }
            survivors.push(FetchGroup::new(group.fetched_at, live));
        }

        if report.dead_removed > 0 || report.empty_groups_removed > 0 {
            report.changed = true;
            cache.replace_groups(survivors);
            index.rebuild(cache.groups());

            logger::debug(
                LogTag::Gc,
                &format!(
                    "Swept {} dead intervals and {} empty groups",
                    report.dead_removed, report.empty_groups_removed
                ),
            );
        }

        let total = cache.total_interval_count();
        report.total_after = total;
        if total <= self.max_intervals {
            return report;
        }

        self.evict(cache, index, total, &mut report);
        report
    }

    fn evict(
        &self,
        cache: &mut FetchGroupCache,
        index: &mut TimestampIndex,
        total: usize,
        report: &mut GcReport,
    ) {
        let range = cache.protected_range();

        let mut evictable: Vec<usize> = cache
            .groups()
            .iter()
            .enumerate()
            .filter(|(_, group)| !FetchGroupCache::group_is_protected(group, &range))
            .map(|(group_id, _)| group_id)
            .collect();
        evictable.sort_by_key(|&group_id| cache.groups()[group_id].fetched_at);

        let mut projected = total;
        let mut evicted: HashSet<usize> = HashSet::new();
        for group_id in evictable {
            if projected <= self.max_intervals {
                break;
            }
            let size = cache.groups()[group_id].len();
            projected -= size;
            report.intervals_evicted += size;
            evicted.insert(group_id);
        }

        if !evicted.is_empty() {
            let remaining: Vec<FetchGroup> = cache
                .groups()
                .iter()
                .enumerate()
                .filter(|(group_id, _)| !evicted.contains(group_id))
                .map(|(_, group)| group.clone())
                .collect();

            report.groups_evicted = evicted.len();
            report.changed = true;
            cache.replace_groups(remaining);
            index.rebuild(cache.groups());

            logger::info(
                LogTag::Gc,
                &format!(
                    "Evicted {} groups ({} intervals), {} intervals remain (ceiling {})",
                    report.groups_evicted,
                    report.intervals_evicted,
                    projected,
                    self.max_intervals
                ),
            );
        }

        report.total_after = projected;
        if projected > self.max_intervals {
            report.capacity_exceeded = true;
            logger::warning(
                LogTag::Gc,
                &format!(
                    "Cache holds {} intervals, above ceiling {}: remaining groups are all protected [{} -> {})",
                    projected, self.max_intervals, range.start, range.end
                ),
            );
        }
    }
}
