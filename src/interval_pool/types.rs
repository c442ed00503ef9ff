// Core types for the interval pool

use super::timestamps::{format_timestamp, normalize_timestamp, parse_timestamp};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Price classification tier reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    #[default]
    Normal,
    Expensive,
    VeryExpensive,
    #[serde(other)]
    Unknown,
}

impl PriceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceLevel::VeryCheap => "VERY_CHEAP",
            PriceLevel::Cheap => "CHEAP",
            PriceLevel::Normal => "NORMAL",
            PriceLevel::Expensive => "EXPENSIVE",
            PriceLevel::VeryExpensive => "VERY_EXPENSIVE",
            PriceLevel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timestamped price record
///
/// Immutable once created; the pool shares it as `Arc<Interval>`. Fields the
/// pool does not model are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub starts_at: String,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub level: PriceLevel,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Interval {
    pub fn new(starts_at: impl Into<String>, total: f64, energy: f64, tax: f64) -> Self {
        Self {
            starts_at: starts_at.into(),
            total,
            energy,
            tax,
            level: PriceLevel::Normal,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_level(mut self, level: PriceLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Index key: the start timestamp in normalized form
    pub fn key(&self) -> String {
        normalize_timestamp(&self.starts_at)
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.starts_at)
    }
}

/// A batch of intervals sharing one fetch wall-time; the unit of eviction
#[derive(Debug, Clone)]
pub struct FetchGroup {
    pub fetched_at: NaiveDateTime,
    pub intervals: Vec<Arc<Interval>>,
}

impl FetchGroup {
    pub fn new(fetched_at: NaiveDateTime, intervals: Vec<Arc<Interval>>) -> Self {
        Self {
            fetched_at,
            intervals,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// Where the authoritative copy of a timestamp lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalLocation {
    pub group_id: usize,
    pub position: usize,
}

impl IntervalLocation {
    pub fn new(group_id: usize, position: usize) -> Self {
        Self { group_id, position }
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {})",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// Point-in-time view of a pool's contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub subject_id: String,
    pub groups: usize,
    pub intervals: usize,
    pub live_intervals: usize,
    pub dead_intervals: usize,
    pub protected_intervals: usize,
    pub index_entries: usize,
    pub oldest_fetched_at: Option<NaiveDateTime>,
    pub newest_fetched_at: Option<NaiveDateTime>,
    pub save_pending: bool,
}
