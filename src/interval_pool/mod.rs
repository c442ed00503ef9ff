// Interval Pool Module
// Per-subject cache of fixed-width price intervals over an external source:
// fetch groups, timestamp index, protected-window GC, gap-driven fetching,
// endpoint routing and debounced persistence.

pub mod cache;
pub mod fetcher;
pub mod gaps;
pub mod gc;
pub mod index;
pub mod manager;
pub mod observer;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod state;
pub mod timestamps;
pub mod types;

#[cfg(test)]
mod tests;

pub use cache::{FetchGroupCache, ProtectedRange, SerializedGroup};
pub use fetcher::{FetchSummary, Fetcher};
pub use gaps::{split_at_cutover, GapDetector};
pub use gc::{GarbageCollector, GcReport};
pub use index::TimestampIndex;
pub use manager::{IntervalPool, IntervalPoolBuilder};
pub use observer::{MetricsSnapshot, NoopObserver, PoolMetrics, PoolObserver};
pub use persistence::{
    decode_subject, encode_subject, load_state, DebouncedSaver, JsonFileStore, MemoryStore,
    PersistedState, StateStore, STATE_VERSION,
};
pub use registry::PoolRegistry;
pub use router::{Endpoint, IntervalSource, Router};
pub use state::{InsertReport, PoolState};
pub use timestamps::{
    align_up, format_timestamp, normalize_timestamp, parse_timestamp, resolution_at,
    resolution_cutover, Clock, ManualClock, SystemClock, TIMESTAMP_FORMAT,
};
pub use types::{FetchGroup, Interval, IntervalLocation, PoolStats, PriceLevel, TimeRange};
