// Registry of per-subject pools sharing one source, store and config

use super::manager::IntervalPool;
use super::observer::{NoopObserver, PoolObserver};
use super::persistence::StateStore;
use super::router::IntervalSource;
use super::timestamps::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult, StoreResult};
use crate::logger::{self, LogTag};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct PoolRegistry {
    source: Arc<dyn IntervalSource>,
    store: Arc<dyn StateStore>,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    wall_clock: Arc<dyn Clock>,
    observer: Arc<dyn PoolObserver>,
    pools: RwLock<HashMap<String, Arc<IntervalPool>>>,
}

impl PoolRegistry {
    pub fn new(source: Arc<dyn IntervalSource>, store: Arc<dyn StateStore>, config: PoolConfig) -> Self {
        Self {
            source,
            store,
            config,
            clock: Arc::new(SystemClock),
            wall_clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_wall_clock(mut self, wall_clock: Arc<dyn Clock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Observer shared by every pool created from now on
    pub fn with_observer(mut self, observer: Arc<dyn PoolObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn get(&self, subject_id: &str) -> Option<Arc<IntervalPool>> {
        self.pools.read().await.get(subject_id).cloned()
    }

    /// The pool for `subject_id`, restored from the store on first access
    pub async fn get_or_create(&self, subject_id: &str) -> PoolResult<Arc<IntervalPool>> {
        if subject_id.trim().is_empty() {
            return Err(PoolError::Validation("subject id is empty".to_string()));
        }

        if let Some(pool) = self.get(subject_id).await {
            return Ok(pool);
        }

        let mut pools = self.pools.write().await;
        // Another caller may have created it while we waited for the write lock
        if let Some(pool) = pools.get(subject_id) {
            return Ok(Arc::clone(pool));
        }

        let pool = IntervalPool::builder(subject_id, Arc::clone(&self.source), Arc::clone(&self.store))
            .config(self.config.clone())
            .clock(Arc::clone(&self.clock))
            .wall_clock(Arc::clone(&self.wall_clock))
            .observer(Arc::clone(&self.observer))
            .build_restored()
            .await?;
        let pool = Arc::new(pool);
        pools.insert(subject_id.to_string(), Arc::clone(&pool));

        logger::info(
            LogTag::Registry,
            &format!("Created pool for subject={} (pools={})", subject_id, pools.len()),
        );
        Ok(pool)
    }

    /// Drop the pool and delete its stored state. Returns whether a pool existed.
    ///
    /// The removed pool is closed first, so callers still holding it can keep
    /// reading but can no longer write the subject back into the store.
    pub async fn remove(&self, subject_id: &str) -> StoreResult<bool> {
        let removed = self.pools.write().await.remove(subject_id);
        if let Some(pool) = &removed {
            pool.close().await;
        }

        self.store.remove(subject_id).await?;

        logger::info(
            LogTag::Registry,
            &format!("Removed subject={} existed={}", subject_id, removed.is_some()),
        );
        Ok(removed.is_some())
    }

    pub async fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.pools.read().await.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Save every pool now. Failures are logged; returns how many saves failed.
    pub async fn flush_all(&self) -> usize {
        let pools: Vec<Arc<IntervalPool>> = self.pools.read().await.values().cloned().collect();

        let results = join_all(pools.iter().map(|pool| pool.flush())).await;
        let failed = results.iter().filter(|result| result.is_err()).count();

        logger::info(
            LogTag::Registry,
            &format!("Flushed all pools (failed={})", failed),
        );
        failed
    }
}
