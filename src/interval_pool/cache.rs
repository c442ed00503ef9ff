// Fetch-group cache: append-only list of fetch groups plus the protected range

use super::timestamps::{format_timestamp, midnight, parse_timestamp, Clock, TIMESTAMP_FORMAT};
use super::types::{FetchGroup, Interval, IntervalLocation};
use crate::errors::StateError;
use chrono::{Duration, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `[start, end)` in normalized ISO form; compared lexicographically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRange {
    pub start: String,
    pub end: String,
}

impl ProtectedRange {
    pub fn contains_key(&self, normalized: &str) -> bool {
        self.start.as_str() <= normalized && normalized < self.end.as_str()
    }
}

/// Serialized form of one fetch group (plain primitives only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedGroup {
    pub fetched_at: String,
    pub intervals: Vec<Interval>,
}

pub struct FetchGroupCache {
    groups: Vec<FetchGroup>,
    clock: Arc<dyn Clock>,
    protected_days_before: i64,
    protected_days_after: i64,
    protected_memo: Mutex<Option<(NaiveDate, ProtectedRange)>>,
}

impl FetchGroupCache {
    pub fn new(clock: Arc<dyn Clock>, protected_days_before: i64, protected_days_after: i64) -> Self {
        Self {
            groups: Vec::new(),
            clock,
            protected_days_before,
            protected_days_after,
            protected_memo: Mutex::new(None),
        }
    }

    /// Append a group and return its id (its position in the group list)
    pub fn add_group(&mut self, intervals: Vec<Arc<Interval>>, fetched_at: chrono::NaiveDateTime) -> usize {
        self.groups.push(FetchGroup::new(fetched_at, intervals));
        self.groups.len() - 1
    }

    pub fn groups(&self) -> &[FetchGroup] {
        &self.groups
    }

    /// Swap in a new group list. Group ids change; the caller must rebuild the index.
    pub fn replace_groups(&mut self, groups: Vec<FetchGroup>) {
        self.groups = groups;
    }

    pub fn interval_at(&self, location: IntervalLocation) -> Option<&Arc<Interval>> {
        self.groups
            .get(location.group_id)
            .and_then(|g| g.intervals.get(location.position))
    }

    /// Protected range for the clock's current day, memoized until the date rolls over
    pub fn protected_range(&self) -> ProtectedRange {
        let today = self.clock.today();
        let mut memo = self.protected_memo.lock();

        if let Some((day, range)) = memo.as_ref() {
            if *day == today {
                return range.clone();
            }
        }

        let today_midnight = midnight(today);
        let range = ProtectedRange {
            start: format_timestamp(today_midnight - Duration::days(self.protected_days_before)),
            end: format_timestamp(today_midnight + Duration::days(self.protected_days_after)),
        };
        *memo = Some((today, range.clone()));
        range
    }

    pub fn is_protected(&self, interval: &Interval) -> bool {
        self.protected_range().contains_key(&interval.key())
    }

    pub fn group_is_protected(group: &FetchGroup, range: &ProtectedRange) -> bool {
        group
            .intervals
            .iter()
            .any(|interval| range.contains_key(&interval.key()))
    }

    pub fn total_interval_count(&self) -> usize {
        self.groups.iter().map(FetchGroup::len).sum()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn serialize(&self) -> Vec<SerializedGroup> {
        self.groups
            .iter()
            .map(|group| SerializedGroup {
                fetched_at: format_timestamp(group.fetched_at),
                intervals: group.intervals.iter().map(|i| (**i).clone()).collect(),
            })
            .collect()
    }

    /// Rebuild groups from their serialized form
    ///
    /// Empty groups are skipped. An unreadable `fetchedAt` makes the whole
    /// snapshot invalid.
    pub fn deserialize(serialized: Vec<SerializedGroup>) -> Result<Vec<FetchGroup>, StateError> {
        let mut groups = Vec::with_capacity(serialized.len());

        for group in serialized {
            let fetched_at = parse_timestamp(&group.fetched_at).ok_or_else(|| {
                StateError::InvalidTimestamp(format!(
                    "fetchedAt '{}' (expected {})",
                    group.fetched_at, TIMESTAMP_FORMAT
                ))
            })?;

            if group.intervals.is_empty() {
                continue;
            }

            let mut intervals: Vec<Arc<Interval>> =
                group.intervals.into_iter().map(Arc::new).collect();
            intervals.sort_by_key(|i| i.key());
            groups.push(FetchGroup::new(fetched_at, intervals));
        }

        Ok(groups)
    }
}

impl std::fmt::Debug for FetchGroupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchGroupCache")
            .field("groups", &self.groups.len())
            .field("intervals", &self.total_interval_count())
            .finish()
    }
}
