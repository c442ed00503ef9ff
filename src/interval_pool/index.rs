// Timestamp index: normalized start timestamp -> current authoritative location

use super::timestamps::normalize_timestamp;
use super::types::{FetchGroup, Interval, IntervalLocation};
use crate::logger::{self, LogTag};
use std::collections::HashMap;

/// O(1) lookup from a timestamp to the (group, position) of its live copy.
///
/// Exactly one entry per normalized timestamp. Any copy of an interval that
/// the index does not point at is dead and will be dropped by the GC.
#[derive(Debug, Default, Clone)]
pub struct TimestampIndex {
    entries: HashMap<String, IntervalLocation>,
}

impl TimestampIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `interval`'s timestamp at (group_id, position), replacing any previous entry
    pub fn add(&mut self, interval: &Interval, group_id: usize, position: usize) {
        self.entries
            .insert(interval.key(), IntervalLocation::new(group_id, position));
    }

    pub fn get(&self, timestamp: &str) -> Option<IntervalLocation> {
        self.entries.get(&normalize_timestamp(timestamp)).copied()
    }

    /// Lookup with a key that is already normalized (hot paths)
    pub(crate) fn get_normalized(&self, key: &str) -> Option<IntervalLocation> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, timestamp: &str) -> bool {
        self.entries.contains_key(&normalize_timestamp(timestamp))
    }

    pub fn remove(&mut self, timestamp: &str) -> Option<IntervalLocation> {
        self.entries.remove(&normalize_timestamp(timestamp))
    }

    /// Re-point many timestamps at once
    pub fn batch_update<I, S>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (S, usize, usize)>,
        S: AsRef<str>,
    {
        for (timestamp, group_id, position) in updates {
            self.entries.insert(
                normalize_timestamp(timestamp.as_ref()),
                IntervalLocation::new(group_id, position),
            );
        }
    }

    /// Replace the whole index from a group list
    ///
    /// The new map is built aside and swapped in, so the index is never seen
    /// half-built. Later groups win for a repeated timestamp.
    pub fn rebuild(&mut self, groups: &[FetchGroup]) {
        let capacity = groups.iter().map(FetchGroup::len).sum();
        let mut entries = HashMap::with_capacity(capacity);

        for (group_id, group) in groups.iter().enumerate() {
            for (position, interval) in group.intervals.iter().enumerate() {
                entries.insert(interval.key(), IntervalLocation::new(group_id, position));
            }
        }

        logger::verbose(
            LogTag::Index,
            &format!(
                "Index rebuilt: {} entries from {} groups",
                entries.len(),
                groups.len()
            ),
        );

        self.entries = entries;
    }

    /// Whether the copy at (group_id, position) is the live one for its timestamp
    pub fn is_live(&self, interval: &Interval, group_id: usize, position: usize) -> bool {
        self.get_normalized(&interval.key()) == Some(IntervalLocation::new(group_id, position))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::sync::Arc;

    fn fetched_at() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-11-03T12:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn interval(ts: &str) -> Interval {
        Interval::new(ts, 0.25, 0.15, 0.1)
    }

    #[test]
    fn test_lookups_are_normalized() {
        let mut index = TimestampIndex::new();
        index.add(&interval("2025-11-03T14:00:00.000+01:00"), 0, 3);

        assert!(index.contains("2025-11-03T14:00:00"));
        assert!(index.contains("2025-11-03T14:00:00+02:00"));
        assert_eq!(
            index.get("2025-11-03T14:00:00"),
            Some(IntervalLocation::new(0, 3))
        );
        assert!(!index.contains("2025-11-03T14:15:00"));
    }

    #[test]
    fn test_add_replaces_previous_entry() {
        let mut index = TimestampIndex::new();
        let iv = interval("2025-11-03T14:00:00");
        index.add(&iv, 0, 0);
        index.add(&iv, 4, 2);

        assert_eq!(index.len(), 1);
        assert!(index.is_live(&iv, 4, 2));
        assert!(!index.is_live(&iv, 0, 0));
    }

    #[test]
    fn test_remove() {
        let mut index = TimestampIndex::new();
        index.add(&interval("2025-11-03T14:00:00"), 1, 1);

        assert_eq!(
            index.remove("2025-11-03T14:00:00Z"),
            Some(IntervalLocation::new(1, 1))
        );
        assert!(index.is_empty());
        assert_eq!(index.remove("2025-11-03T14:00:00"), None);
    }

    #[test]
    fn test_batch_update() {
        let mut index = TimestampIndex::new();
        index.batch_update(vec![
            ("2025-11-03T14:00:00", 2, 0),
            ("2025-11-03T14:15:00", 2, 1),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("2025-11-03T14:15:00"),
            Some(IntervalLocation::new(2, 1))
        );
    }

    #[test]
    fn test_rebuild_replaces_state() {
        let mut index = TimestampIndex::new();
        index.add(&interval("2020-01-01T00:00:00"), 9, 9);

        let groups = vec![
            FetchGroup::new(
                fetched_at(),
                vec![
                    Arc::new(interval("2025-11-03T14:00:00")),
                    Arc::new(interval("2025-11-03T14:15:00")),
                ],
            ),
            FetchGroup::new(fetched_at(), vec![Arc::new(interval("2025-11-03T14:00:00"))]),
        ];
        index.rebuild(&groups);

        assert_eq!(index.len(), 2);
        assert!(!index.contains("2020-01-01T00:00:00"));
        assert_eq!(
            index.get("2025-11-03T14:00:00"),
            Some(IntervalLocation::new(1, 0))
        );
        assert_eq!(
            index.get("2025-11-03T14:15:00"),
            Some(IntervalLocation::new(0, 1))
        );
    }
}
