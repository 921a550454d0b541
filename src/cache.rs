use crate::error::SyncError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a cached read
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default bound on stored reads
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct CacheEntry {
    stored_at: Instant,
    payload: Value,
}

/// Time-bounded memo of read responses, keyed by method, path and query
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Result<Self, SyncError> {
        if ttl.is_zero() {
            return Err(SyncError::Configuration(
                "cache ttl must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Result<Self, SyncError> {
        if max_entries == 0 {
            return Err(SyncError::Configuration(
                "cache max entries must be at least 1".to_string(),
            ));
        }
        self.max_entries = max_entries;
        Ok(self)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a stored payload. Expired entries are evicted here and never served.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries();
        let fresh = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Store a payload. Expired entries are swept first; when the cache is
    /// still full the oldest entry makes room.
    pub fn insert(&self, key: String, payload: Value) {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Swept expired cache entries");
        }

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                payload,
            },
        );
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
