// Timestamp normalization, source resolution and clocks

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use parking_lot::Mutex;

/// Fixed-width normalized form. Lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NORMALIZED_LEN: usize = 19;

/// Source resolution before the cutover, in minutes
pub const LEGACY_RESOLUTION_MINUTES: i64 = 60;

/// Source resolution at and after the cutover, in minutes
pub const QUARTER_HOUR_RESOLUTION_MINUTES: i64 = 15;

/// The instant the source switched from hourly to quarter-hourly intervals
pub fn resolution_cutover() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 10, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Interval width for an interval starting at `ts`
pub fn resolution_at(ts: NaiveDateTime) -> Duration {
    if ts < resolution_cutover() {
        Duration::minutes(LEGACY_RESOLUTION_MINUTES)
    } else {
        Duration::minutes(QUARTER_HOUR_RESOLUTION_MINUTES)
    }
}

/// Parse a source timestamp, keeping the wall time as written
///
/// Sub-second precision and UTC offsets are dropped: "2025-11-03T14:00:00.000+01:00"
/// becomes 2025-11-03 14:00:00. Date-only input is read as midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Some(head) = raw.get(..NORMALIZED_LEN) {
        let head = head.replacen(' ', "T", 1);
        if let Ok(ts) = NaiveDateTime::parse_from_str(&head, TIMESTAMP_FORMAT) {
            return Some(ts);
        }
    }

    if let Some(head) = raw.get(..16) {
        let head = head.replacen(' ', "T", 1);
        if let Ok(ts) = NaiveDateTime::parse_from_str(&head, "%Y-%m-%dT%H:%M") {
            return Some(ts);
        }
    }

    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(|d| d.and_time(NaiveTime::MIN))
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Normalize a timestamp into the index key form
///
/// Unparseable input is returned trimmed so it still acts as a stable key.
pub fn normalize_timestamp(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(ts) => format_timestamp(ts),
        None => raw.trim().to_string(),
    }
}

/// Round `ts` up to the next interval boundary of the resolution in effect
pub fn align_up(ts: NaiveDateTime) -> NaiveDateTime {
    let step = resolution_at(ts).num_minutes();
    let floor_minute = (ts.minute() as i64 / step) * step;
    let floored = ts
        .date()
        .and_hms_opt(ts.hour(), floor_minute as u32, 0)
        .unwrap_or(ts);

    if floored == ts {
        ts
    } else {
        floored + Duration::minutes(step)
    }
}

pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Source of "now" as local wall time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// The real local clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A settable clock for simulations and tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}
