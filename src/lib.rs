pub mod config;
pub mod errors; // Structured error handling
pub mod interval_pool;
pub mod logger;

pub use errors::{PoolError, PoolResult, SourceError, StateError, StoreError, StoreResult};
pub use interval_pool::{
    Interval, IntervalPool, IntervalPoolBuilder, IntervalSource, JsonFileStore, MemoryStore,
    PoolMetrics, PoolObserver, PoolRegistry, PoolStats, StateStore, TimeRange,
};
