/*!
 * Lookup caching functionality.
 *
 * This module provides a size-bounded, disk-backed cache for remote lookup
 * results so repeated runs avoid redundant API calls.
 *
 * - Entries live in hash-sharded buckets, each behind its own lock, so
 *   unrelated keys never block each other.
 * - The tracked size is kept under the configured budget by evicting the
 *   oldest entries first.
 * - A per-key flight table provides the single-flight contract: only one
 *   remote call per key is in flight, concurrent callers wait for its outcome.
 * - `flush` rewrites the cache file atomically (temp file then rename).
 */

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::app_config::CacheConfig;
use crate::errors::{CacheError, LookupError};

use super::model::{AnnotationPayload, LookupKey};

/// Version written into the cache file
const CACHE_FILE_VERSION: u32 = 1;

/// Bytes of `{"version":1,"entries":{}}` around the entries of the file
const FILE_ENVELOPE_BYTES: u64 = 26;

/// Number of independently locked buckets
const BUCKET_COUNT: usize = 16;

/// Outcome of one remote lookup, shared with every waiter of the flight
pub type FlightOutcome = Result<AnnotationPayload, LookupError>;

type FlightSlot = Option<FlightOutcome>;

/// One cached lookup result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: LookupKey,
    pub value: AnnotationPayload,
    pub stored_at: DateTime<Utc>,
    /// Bytes the entry occupies in the cache file, map key included
    #[serde(skip)]
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(key: LookupKey, value: AnnotationPayload) -> Result<Self, CacheError> {
        Self::with_timestamp(key, value, Utc::now())
    }

    pub fn with_timestamp(key: LookupKey, value: AnnotationPayload, stored_at: DateTime<Utc>) -> Result<Self, CacheError> {
        let mut entry = Self {
            key,
            value,
            stored_at,
            size_bytes: 0,
        };
        entry.size_bytes = entry.serialized_len()?;
        Ok(entry)
    }

    /// Length of `"kind:text":{entry},` as written by `flush`
    fn serialized_len(&self) -> Result<u64, CacheError> {
        let map_key = serde_json::to_vec(&self.key.to_string())?;
        let body = serde_json::to_vec(self)?;
        Ok((map_key.len() + 1 + body.len() + 1) as u64)
    }
}

/// On-disk layout of the cache file
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Result of a successful flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Entries written
    pub entries: usize,
    /// Size of the written file
    pub bytes: u64,
    /// The file is larger than the configured budget
    pub over_budget: bool,
}

/// Cache statistics for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub tracked_bytes: u64,
    pub max_bytes: u64,
    pub file_bytes: u64,
    pub enabled: bool,
}

struct Bucket {
    entries: RwLock<HashMap<LookupKey, CacheEntry>>,
    flights: Mutex<HashMap<LookupKey, watch::Receiver<FlightSlot>>>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }
}

/// Result of registering intent to resolve a key
pub enum Flight<'a> {
    /// The caller owns the remote call and must complete the guard
    Leader(FlightGuard<'a>),
    /// Another task is already resolving the key
    Follower(FlightWaiter),
}

/// Ownership of an in-flight lookup
///
/// Dropping the guard without completing it releases waiters with
/// `LookupError::Cancelled`.
pub struct FlightGuard<'a> {
    store: &'a CacheStore,
    key: LookupKey,
    sender: Option<watch::Sender<FlightSlot>>,
}

impl FlightGuard<'_> {
    pub fn key(&self) -> &LookupKey {
        &self.key
    }

    /// Publish the outcome to every waiter and release the key
    pub fn complete(mut self, outcome: FlightOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FlightOutcome) {
        if let Some(sender) = self.sender.take() {
            self.store.bucket(&self.key).flights.lock().remove(&self.key);
            sender.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.finish(Err(LookupError::Cancelled));
    }
}

/// Handle used by a follower to wait for the leader's outcome
pub struct FlightWaiter {
    receiver: watch::Receiver<FlightSlot>,
}

impl FlightWaiter {
    /// Wait until the leader publishes its outcome or the run is cancelled
    pub async fn wait(mut self, cancel: &CancellationToken) -> FlightOutcome {
        tokio::select! {
            result = self.receiver.wait_for(|slot| slot.is_some()) => match result {
                Ok(slot) => (*slot).clone().unwrap_or(Err(LookupError::Cancelled)),
                Err(_) => Err(LookupError::Cancelled),
            },
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
        }
    }
}

/// Size-bounded, disk-backed store of lookup results
pub struct CacheStore {
    buckets: Vec<Bucket>,
    hasher: RandomState,
    total_bytes: AtomicU64,
    max_bytes: u64,
    path: Option<PathBuf>,
    enabled: bool,
    dirty: AtomicBool,
    eviction_lock: Mutex<()>,
    flush_lock: Mutex<()>,
}

impl CacheStore {
    /// Create an empty cache that is never written to disk
    pub fn in_memory(max_bytes: u64) -> Self {
        Self::build(None, max_bytes, true)
    }

    /// Create an empty cache bound to a file, without loading it
    pub fn with_path<P: AsRef<Path>>(path: P, max_bytes: u64) -> Self {
        Self::build(Some(path.as_ref().to_path_buf()), max_bytes, true)
    }

    /// Create a disabled cache: lookups always miss and nothing is stored
    pub fn disabled() -> Self {
        Self::build(None, 0, false)
    }

    fn build(path: Option<PathBuf>, max_bytes: u64, enabled: bool) -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Bucket::new()).collect(),
            hasher: RandomState::new(),
            total_bytes: AtomicU64::new(0),
            max_bytes,
            path,
            enabled,
            dirty: AtomicBool::new(false),
            eviction_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
        }
    }

    /// Open the cache of a working directory, loading the persisted file if present.
    ///
    /// A missing or unreadable file yields an empty cache.
    pub fn open<P: AsRef<Path>>(config: &CacheConfig, work_dir: P) -> Self {
        if !config.enabled {
            info!("API cache disabled in settings. Not loading cache.");
            return Self::disabled();
        }

        let path = work_dir.as_ref().join(&config.file_name);
        let store = Self::with_path(&path, config.max_size_bytes());

        if !path.exists() {
            info!("API cache file not found. Starting with empty cache.");
            return store;
        }

        match store.load() {
            Ok(count) => info!("API cache loaded: {} entries from {:?}", count, path),
            Err(e) => warn!("Error reading cache file {:?}: {}. Starting with empty cache.", path, e),
        }
        store
    }

    /// Replace the in-memory content with the persisted file
    pub fn load(&self) -> Result<usize, CacheError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let content = std::fs::read(path)?;
        let file: CacheFile = serde_json::from_slice(&content)?;
        if file.version != CACHE_FILE_VERSION {
            warn!("Cache file version {} differs from {}, loading anyway", file.version, CACHE_FILE_VERSION);
        }

        let entries = file
            .entries
            .into_values()
            .map(|e| CacheEntry::with_timestamp(e.key, e.value, e.stored_at))
            .collect::<Result<Vec<_>, _>>()?;

        self.clear_memory();
        let count = entries.len();
        for entry in entries {
            self.insert_entry(entry);
        }
        self.dirty.store(false, Ordering::SeqCst);
        Ok(count)
    }

    fn bucket(&self, key: &LookupKey) -> &Bucket {
        let index = (self.hasher.hash_one(key) as usize) % self.buckets.len();
        &self.buckets[index]
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a cached value
    pub fn get(&self, key: &LookupKey) -> Option<AnnotationPayload> {
        if !self.enabled {
            return None;
        }
        self.bucket(key).entries.read().get(key).map(|e| e.value.clone())
    }

    pub fn contains(&self, key: &LookupKey) -> bool {
        self.enabled && self.bucket(key).entries.read().contains_key(key)
    }

    /// Store a value, replacing any previous entry for the key
    pub fn put(&self, key: LookupKey, value: AnnotationPayload) {
        if !self.enabled {
            return;
        }
        match CacheEntry::new(key, value) {
            Ok(entry) => self.insert_entry(entry),
            Err(e) => warn!("Not caching lookup result: {}", e),
        }
    }

    /// Store a prepared entry, then evict if the budget is exceeded
    pub fn insert_entry(&self, entry: CacheEntry) {
        if !self.enabled {
            return;
        }

        let added = entry.size_bytes;
        let previous = {
            let mut entries = self.bucket(&entry.key).entries.write();
            entries.insert(entry.key.clone(), entry)
        };

        self.total_bytes.fetch_add(added, Ordering::SeqCst);
        if let Some(previous) = previous {
            self.total_bytes.fetch_sub(previous.size_bytes, Ordering::SeqCst);
        }
        self.dirty.store(true, Ordering::SeqCst);

        if self.total_bytes() > self.entry_budget() {
            self.evict_if_over_budget();
        }
    }

    /// Bytes left for entries once the file envelope is accounted for
    fn entry_budget(&self) -> u64 {
        self.max_bytes.saturating_sub(FILE_ENVELOPE_BYTES)
    }

    /// Remove the oldest entries until the cache file would fit the budget.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_if_over_budget(&self) -> usize {
        let _guard = self.eviction_lock.lock();
        let budget = self.entry_budget();
        if self.total_bytes() <= budget {
            return 0;
        }

        let mut candidates: Vec<(DateTime<Utc>, LookupKey)> = self
            .buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .entries
                    .read()
                    .values()
                    .map(|e| (e.stored_at, e.key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (stored_at, key) in candidates {
            if self.total_bytes() <= budget {
                break;
            }
            let mut entries = self.bucket(&key).entries.write();
            // skip entries overwritten since the candidate list was built
            if entries.get(&key).is_some_and(|e| e.stored_at == stored_at) {
                if let Some(removed) = entries.remove(&key) {
                    self.total_bytes.fetch_sub(removed.size_bytes, Ordering::SeqCst);
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            debug!("Evicted {} cache entries, {} bytes tracked", evicted, self.total_bytes());
        }
        evicted
    }

    /// Register intent to resolve `key`.
    ///
    /// The first caller becomes the leader; callers arriving while the leader
    /// is in flight get a waiter on the same outcome.
    pub fn begin_flight(&self, key: &LookupKey) -> Flight<'_> {
        let mut flights = self.bucket(key).flights.lock();
        if let Some(receiver) = flights.get(key) {
            return Flight::Follower(FlightWaiter {
                receiver: receiver.clone(),
            });
        }

        let (sender, receiver) = watch::channel(None);
        flights.insert(key.clone(), receiver);
        Flight::Leader(FlightGuard {
            store: self,
            key: key.clone(),
            sender: Some(sender),
        })
    }

    /// Number of keys currently being resolved
    pub fn in_flight(&self) -> usize {
        self.buckets.iter().map(|b| b.flights.lock().len()).sum()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Whether entries changed since the last load or flush
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn clear_memory(&self) {
        for bucket in &self.buckets {
            bucket.entries.write().clear();
        }
        self.total_bytes.store(0, Ordering::SeqCst);
    }

    /// Drop every entry and delete the cache file
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.flush_lock.lock();
        self.clear_memory();
        self.dirty.store(false, Ordering::SeqCst);

        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("API cache cleared successfully.");
        Ok(())
    }

    /// Write the whole table to disk.
    ///
    /// The file is written to a temporary sibling and renamed over the
    /// previous one, so a failed flush never leaves a partial file.
    pub fn flush(&self) -> Result<FlushReport, CacheError> {
        let Some(path) = self.path.as_ref().filter(|_| self.enabled) else {
            return Ok(FlushReport::default());
        };

        let _guard = self.flush_lock.lock();
        self.dirty.store(false, Ordering::SeqCst);

        let result = self.write_file(path);
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        let report = result?;

        if report.over_budget {
            warn!(
                "API cache file ({:.2} MB) exceeds configured maximum size ({:.2} MB).",
                report.bytes as f64 / (1024.0 * 1024.0),
                self.max_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        debug!("API cache saved: {} entries, {} bytes", report.entries, report.bytes);
        Ok(report)
    }

    fn write_file(&self, path: &Path) -> Result<FlushReport, CacheError> {
        let entries: BTreeMap<String, CacheEntry> = self
            .buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .entries
                    .read()
                    .values()
                    .map(|e| (e.key.to_string(), e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let count = entries.len();

        let bytes = serde_json::to_vec(&CacheFile {
            version: CACHE_FILE_VERSION,
            entries,
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path)?;

        let size = bytes.len() as u64;
        Ok(FlushReport {
            entries: count,
            bytes: size,
            over_budget: self.max_bytes > 0 && size > self.max_bytes,
        })
    }

    /// Run `flush` on the blocking thread pool
    pub async fn flush_async(self: &Arc<Self>) -> Result<FlushReport, CacheError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.flush())
            .await
            .map_err(|e| CacheError::Persist(format!("flush task failed: {}", e)))?
    }

    pub fn stats(&self) -> CacheStats {
        let file_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        CacheStats {
            entries: self.len(),
            tracked_bytes: self.total_bytes(),
            max_bytes: self.max_bytes,
            file_bytes,
            enabled: self.enabled,
        }
    }
}
