// Fetches missing ranges one gap at a time through the router

use super::router::Router;
use super::timestamps::Clock;
use super::types::{Interval, TimeRange};
use crate::errors::SourceError;
use crate::logger::{self, LogTag};
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Instant;

pub struct Fetcher {
    router: Router,
    clock: Arc<dyn Clock>,
}

/// Totals for one `fetch_missing_ranges` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub requests: usize,
    pub intervals: usize,
}

impl Fetcher {
    pub fn new(router: Router, clock: Arc<dyn Clock>) -> Self {
        Self { router, clock }
    }

    /// Fetch each gap in turn and hand the result to `on_fetched` right away
    ///
    /// The fetch time passed along comes from the pool clock. The first failure
    /// stops the loop; gaps already handed over stay with the caller.
    pub async fn fetch_missing_ranges<F>(
        &self,
        subject_id: &str,
        gaps: &[TimeRange],
        mut on_fetched: F,
    ) -> Result<FetchSummary, SourceError>
    where
        F: FnMut(Vec<Interval>, NaiveDateTime),
    {
        let mut summary = FetchSummary::default();

        for gap in gaps {
            let started = Instant::now();
            let intervals = match self.router.fetch(subject_id, gap.start, gap.end).await {
                Ok(intervals) => intervals,
                Err(e) => {
                    logger::warning(
                        LogTag::Fetcher,
                        &format!("Fetch failed for subject={} gap={}: {}", subject_id, gap, e),
                    );
                    return Err(e);
                }
            };

            logger::debug(
                LogTag::Fetcher,
                &format!(
                    "subject={} gap={} span_min={} intervals={} latency_ms={}",
                    subject_id,
                    gap,
                    gap.duration().num_minutes(),
                    intervals.len(),
                    started.elapsed().as_millis()
                ),
            );

            summary.requests += 1;
            summary.intervals += intervals.len();
            on_fetched(intervals, self.clock.now());
        }

        Ok(summary)
    }
}
