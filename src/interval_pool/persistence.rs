// Persistence: snapshot format, storage backends and the debounced saver

use super::cache::{FetchGroupCache, SerializedGroup};
use super::observer::PoolObserver;
use super::state::PoolState;
use super::types::FetchGroup;
use crate::errors::{StateError, StoreError, StoreResult};
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const STATE_VERSION: u32 = 1;

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Versioned snapshot of one pool, JSON on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub subject_id: String,
    pub fetch_groups: Vec<SerializedGroup>,
}

impl PersistedState {
    /// Capture the live intervals of `state`
    pub fn capture(subject_id: &str, state: &PoolState) -> Self {
        Self {
            version: STATE_VERSION,
            subject_id: subject_id.to_string(),
            fetch_groups: state.live_groups(),
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and check a snapshot written for `expected_subject`
    pub fn decode(bytes: &[u8], expected_subject: &str) -> Result<Self, StateError> {
        let state: PersistedState = serde_json::from_slice(bytes)?;

        if state.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                expected: STATE_VERSION,
            });
        }

        if state.subject_id != expected_subject {
            return Err(StateError::SubjectMismatch {
                found: state.subject_id,
                expected: expected_subject.to_string(),
            });
        }

        Ok(state)
    }

    pub fn into_groups(self) -> Result<Vec<FetchGroup>, StateError> {
        FetchGroupCache::deserialize(self.fetch_groups)
    }
}

// =============================================================================
// STORAGE BACKENDS
// =============================================================================

/// Where pool snapshots live, keyed by subject
#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing was stored for the subject yet
    async fn load(&self, subject_id: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn save(&self, subject_id: &str, bytes: &[u8]) -> StoreResult<()>;

    async fn remove(&self, subject_id: &str) -> StoreResult<()>;
}

/// In-process store, for tests and embedding hosts that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, subject_id: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(subject_id).cloned()
    }

    pub fn insert(&self, subject_id: &str, bytes: Vec<u8>) {
        self.entries.lock().insert(subject_id.to_string(), bytes);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, subject_id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.get(subject_id))
    }

    async fn save(&self, subject_id: &str, bytes: &[u8]) -> StoreResult<()> {
        self.insert(subject_id, bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, subject_id: &str) -> StoreResult<()> {
        self.entries.lock().remove(subject_id);
        Ok(())
    }
}

/// One JSON file per subject under a directory
///
/// Writes go to a `.tmp` sibling first and are renamed into place, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    prefix: String,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, subject_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", self.prefix, encode_subject(subject_id)))
    }

    /// Subjects with a state file in the directory, sorted
    ///
    /// Files whose name does not decode back to a subject id are skipped.
    pub async fn subjects(&self) -> StoreResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", self.prefix);
        let mut subjects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(subject) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(decode_subject)
            {
                subjects.push(subject);
            }
        }
        subjects.sort();
        Ok(subjects)
    }
}

/// File-name form of a subject id
///
/// Lowercase ASCII letters, digits, `-` and `_` pass through; every other byte
/// becomes `%XX`. Distinct ids map to distinct names, also on case-insensitive
/// filesystems.
pub fn encode_subject(subject_id: &str) -> String {
    let mut encoded = String::with_capacity(subject_id.len());
    for byte in subject_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Inverse of [`encode_subject`]; `None` for names it never produces
pub fn decode_subject(encoded: &str) -> Option<String> {
    let raw = encoded.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            b'%' => {
                let hex = encoded.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F')) {
                    return None;
                }
                let byte = u8::from_str_radix(hex, 16).ok()?;
                if matches!(byte, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_') {
                    return None;
                }
                bytes.push(byte);
                i += 3;
            }
            b @ (b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_') => {
                bytes.push(b);
                i += 1;
            }
            _ => return None,
        }
    }

    String::from_utf8(bytes).ok()
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, subject_id: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(subject_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, subject_id: &str, bytes: &[u8]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(subject_id);
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn remove(&self, subject_id: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(subject_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// DEBOUNCED SAVER
// =============================================================================

struct SaverInner {
    subject_id: String,
    store: Arc<dyn StateStore>,
    state: Arc<Mutex<PoolState>>,
    delay: Duration,
    write_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    observer: Arc<dyn PoolObserver>,
}

impl SaverInner {
    async fn persist(&self) -> StoreResult<()> {
        let _write = self.write_lock.lock().await;

        if self.closed.load(Ordering::SeqCst) {
            logger::debug(
                LogTag::Persist,
                &format!("Skipping save for closed subject={}", self.subject_id),
            );
            return Ok(());
        }

        let snapshot = {
            let state = self.state.lock();
            PersistedState::capture(&self.subject_id, &state)
        };
        let bytes = snapshot.encode()?;

        self.store.save(&self.subject_id, &bytes).await?;

        logger::debug(
            LogTag::Persist,
            &format!("Saved subject={} bytes={}", self.subject_id, bytes.len()),
        );
        Ok(())
    }

    async fn persist_logged(&self) -> StoreResult<()> {
        let result = self.persist().await;
        if let Err(e) = &result {
            logger::error(
                LogTag::Persist,
                &format!("Failed to save subject={}: {}", self.subject_id, e),
            );
        }
        self.observer.on_save(&self.subject_id, result.is_ok());
        result
    }
}

/// Coalesces state changes into one write after a quiet period
///
/// Every `schedule` call restarts the timer. Only the sleeping timer is ever
/// aborted: once it fires, the write runs in its own task and always completes,
/// so writes never overlap. Storage failures are logged and never surface to
/// readers of the pool.
pub struct DebouncedSaver {
    inner: Arc<SaverInner>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedSaver {
    pub fn new(
        subject_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        state: Arc<Mutex<PoolState>>,
        delay: Duration,
        observer: Arc<dyn PoolObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(SaverInner {
                subject_id: subject_id.into(),
                store,
                state,
                delay,
                write_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                observer,
            }),
            pending: Mutex::new(None),
        }
    }

    /// (Re)start the timer
    ///
    /// Needs a tokio runtime to spawn the timer. Without one, or once the saver
    /// is closed, nothing is scheduled and the change waits for the next
    /// schedule or `flush`.
    pub fn schedule(&self) {
        if self.is_closed() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                logger::warning(
                    LogTag::Persist,
                    &format!(
                        "No async runtime, save not scheduled for subject={}",
                        self.inner.subject_id
                    ),
                );
                return;
            }
        };

        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        let inner = Arc::clone(&self.inner);
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(inner.delay).await;
            // Detached from the timer so aborting the timer cannot cut a write short
            let write = tokio::spawn(async move {
                let _ = inner.persist_logged().await;
            });
            let _ = write.await;
        }));

        logger::verbose(
            LogTag::Persist,
            &format!(
                "Save scheduled for subject={} in {}ms",
                self.inner.subject_id,
                self.inner.delay.as_millis()
            ),
        );
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Drop a pending save without writing. A write already running finishes.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// Cancel the timer and write now
    pub async fn flush(&self) -> StoreResult<()> {
        self.cancel();
        self.inner.persist_logged().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop saving for good
    ///
    /// Cancels the timer and waits out any write in progress. Once this
    /// returns, nothing more reaches the store from this saver.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel();
        let _write = self.inner.write_lock.lock().await;
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Read and validate the stored snapshot for `subject_id`
///
/// Missing state is `Ok(None)`. Storage and format problems are returned so
/// the caller can decide to start empty.
pub async fn load_state(
    store: &dyn StateStore,
    subject_id: &str,
) -> Result<Option<Vec<FetchGroup>>, StoreError> {
    let bytes = match store.load(subject_id).await? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };

    let groups = PersistedState::decode(&bytes, subject_id).and_then(PersistedState::into_groups)?;

    Ok(Some(groups))
}
