// Gap detection over cached intervals, with resolution-cutover splitting

use super::timestamps::{align_up, resolution_at, resolution_cutover};
use super::types::{Interval, TimeRange};
use crate::logger::{self, LogTag};
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

/// Computes the sub-ranges of a request that the cache does not cover
#[derive(Debug, Clone)]
pub struct GapDetector {
    tolerance: Duration,
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new(Duration::seconds(1))
    }
}

impl GapDetector {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// Missing sub-ranges of `[range_start, range_end)`, already split at the cutover
    ///
    /// Each cached interval covers `[start, start + width)`, where width is the
    /// source resolution in effect at its start.
    pub fn detect_gaps(
        &self,
        cached: &[Arc<Interval>],
        range_start: NaiveDateTime,
        range_end: NaiveDateTime,
    ) -> Vec<TimeRange> {
        if range_start >= range_end {
            return Vec::new();
        }

        let mut starts: Vec<NaiveDateTime> = cached
            .iter()
            .filter_map(|interval| interval.start_time())
            .filter(|&start| start < range_end && start + resolution_at(start) > range_start)
            .collect();

        if starts.is_empty() {
            return split_at_cutover(TimeRange::new(range_start, range_end));
        }

        starts.sort();
        starts.dedup();

        let mut gaps = Vec::new();

        let first = starts[0];
        if first - align_up(range_start).min(first) > self.tolerance {
            gaps.push(TimeRange::new(range_start, first));
        }

        for pair in starts.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let width = resolution_at(current);
            if next - current > width + self.tolerance {
                gaps.push(TimeRange::new(current + width, next));
            }
        }

        let last = starts[starts.len() - 1];
        let last_end = last + resolution_at(last);
        if last_end < range_end && range_end - last_end >= resolution_at(last_end) {
            gaps.push(TimeRange::new(last_end, range_end));
        }

        let gaps: Vec<TimeRange> = gaps.into_iter().flat_map(split_at_cutover).collect();

        if !gaps.is_empty() {
            logger::debug(
                LogTag::Gaps,
                &format!(
                    "{} gaps in {} ({} cached): {}",
                    gaps.len(),
                    TimeRange::new(range_start, range_end),
                    starts.len(),
                    gaps.iter()
                        .map(|g| g.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            );
        }

        gaps
    }
}

/// Split a range that straddles the resolution cutover into two ranges at it
pub fn split_at_cutover(range: TimeRange) -> Vec<TimeRange> {
    let cutover = resolution_cutover();
    if range.start < cutover && cutover < range.end {
        vec![
            TimeRange::new(range.start, cutover),
            TimeRange::new(cutover, range.end),
        ]
    } else {
        vec![range]
    }
}
