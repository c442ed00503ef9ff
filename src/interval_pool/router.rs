// Endpoint routing: recent vs. historical upstream calls

use super::timestamps::{midnight, Clock, SystemClock};
use super::types::{Interval, TimeRange};
use crate::errors::SourceError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use std::fmt;
use std::sync::Arc;

/// The external price source
///
/// Implementations own transport, authentication, retries and rate limiting.
/// Both calls return intervals ordered by start time.
#[async_trait]
pub trait IntervalSource: Send + Sync {
    /// The "recent" endpoint. Upstream returns its own fixed window around the
    /// real current day, whatever the requested range.
    async fn fetch_recent(
        &self,
        subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Interval>, SourceError>;

    /// The "historical" endpoint for an arbitrary past range
    async fn fetch_historical(
        &self,
        subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Interval>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Recent,
    Historical,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Recent => "recent",
            Endpoint::Historical => "historical",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct Router {
    source: Arc<dyn IntervalSource>,
    wall_clock: Arc<dyn Clock>,
    recent_days_back: i64,
}

impl Router {
    pub fn new(source: Arc<dyn IntervalSource>, recent_days_back: i64) -> Self {
        Self {
            source,
            wall_clock: Arc::new(SystemClock),
            recent_days_back,
        }
    }

    /// Replace the wall clock. It stays separate from any simulated pool clock.
    pub fn with_wall_clock(mut self, wall_clock: Arc<dyn Clock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Earliest instant the recent endpoint serves
    pub fn boundary(&self) -> NaiveDateTime {
        midnight(self.wall_clock.today()) - Duration::days(self.recent_days_back)
    }

    /// Which endpoint serves which part of `range`, in chronological order
    pub fn plan(&self, range: TimeRange) -> Vec<(Endpoint, TimeRange)> {
        if range.is_empty() {
            return Vec::new();
        }

        let boundary = self.boundary();
        if range.end <= boundary {
            vec![(Endpoint::Historical, range)]
        } else if range.start >= boundary {
            vec![(Endpoint::Recent, range)]
        } else {
            vec![
                (Endpoint::Historical, TimeRange::new(range.start, boundary)),
                (Endpoint::Recent, TimeRange::new(boundary, range.end)),
            ]
        }
    }

    pub async fn fetch(
        &self,
        subject_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Interval>, SourceError> {
        let mut intervals = Vec::new();

        for (endpoint, part) in self.plan(TimeRange::new(start, end)) {
            logger::debug(
                LogTag::Router,
                &format!("subject={} endpoint={} range={}", subject_id, endpoint, part),
            );

            let fetched = match endpoint {
                Endpoint::Recent => {
                    self.source
                        .fetch_recent(subject_id, part.start, part.end)
                        .await?
                }
                Endpoint::Historical => {
                    self.source
                        .fetch_historical(subject_id, part.start, part.end)
                        .await?
                }
            };
            intervals.extend(fetched);
        }

        Ok(intervals)
    }
}
