//! Local result cache: query key → record list, expiring after 24 hours.
//!
//! Storage is pluggable through [`CacheStore`]. [`ResultCache`] sits in front
//! of the store, enforces expiry, and swallows storage failures so that a
//! broken cache never fails a search.

pub mod file;
pub mod memory;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cepik::VehicleRecord;
use crate::utils::log_if_slow;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Entries older than this are treated as absent.
pub const CACHE_TTL: TimeDelta = TimeDelta::hours(24);

const SLOW_READ_THRESHOLD: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<VehicleRecord>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<VehicleRecord>) -> Self {
        Self {
            key: key.into(),
            payload,
            stored_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.stored_at <= ttl
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed for {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry could not be (de)serialized")]
    Codec(#[from] serde_json::Error),
    #[error("cache is disabled")]
    Disabled,
}

/// Key-value persistence for cache entries.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn write(&self, entry: &CacheEntry) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    /// Drop every entry stored before `cutoff`, returning how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError>;
}

/// Store used when caching is turned off: never hits, refuses writes.
pub struct DisabledStore;

#[async_trait::async_trait]
impl CacheStore for DisabledStore {
    async fn read(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn write(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Disabled)
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<usize, CacheError> {
        Ok(0)
    }
}

#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: TimeDelta,
    enabled: bool,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl: CACHE_TTL,
            enabled: true,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn disabled() -> Self {
        Self {
            store: Arc::new(DisabledStore),
            ttl: CACHE_TTL,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh payload for `key`, if any. A stale entry is removed on the way out.
    pub async fn get(&self, key: &str) -> Option<Vec<VehicleRecord>> {
        let start = Instant::now();
        let entry = match self.store.read(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = ?e, key, "Cache read failed, treating as miss");
                None
            }
        };
        log_if_slow(start, SLOW_READ_THRESHOLD, "cache read");

        let entry = entry?;
        if entry.is_fresh(Utc::now(), self.ttl) {
            debug!(key, records = entry.payload.len(), "Cache hit");
            return Some(entry.payload);
        }

        debug!(key, stored_at = %entry.stored_at, "Cache entry expired");
        if let Err(e) = self.store.remove(key).await {
            warn!(error = ?e, key, "Failed to remove expired cache entry");
        }
        None
    }

    /// Upsert `payload` under `key`. Returns whether the write landed.
    pub async fn put(&self, key: &str, payload: Vec<VehicleRecord>) -> bool {
        let entry = CacheEntry::new(key, payload);
        match self.store.write(&entry).await {
            Ok(()) => {
                debug!(key, records = entry.payload.len(), "Cached result");
                true
            }
            Err(CacheError::Disabled) => false,
            Err(e) => {
                warn!(error = ?e, key, "Cache write failed");
                false
            }
        }
    }

    /// Sweep every entry past its expiry.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_older_than(Utc::now() - self.ttl).await {
            Ok(0) => 0,
            Ok(purged) => {
                info!(purged, "Purged expired cache entries");
                purged
            }
            Err(e) => {
                warn!(error = ?e, "Cache purge failed");
                0
            }
        }
    }

    /// Drop every entry regardless of age.
    pub async fn clear(&self) -> usize {
        match self.store.purge_older_than(Utc::now() + TimeDelta::seconds(1)).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = ?e, "Cache clear failed");
                0
            }
        }
    }
}
