//! Bounded in-memory cache of transcoded files.
//!
//! The cache maps virtual paths to shared [`CacheEntry`] handles and keeps
//! them in least-recently-used order. Two locks with distinct jobs:
//!
//! - The **structural lock** (here) guards the map and recency order. It is
//!   held only for pointer work, never across a transcode, so a slow
//!   population of one file never blocks lookups for others.
//! - The **entry lock** (see [`CacheEntry`]) serializes population and
//!   buffer reads for one file.
//!
//! Lock order is structural → entry, taken in that order by eviction and
//! never reversed anywhere.

mod entry;

pub use entry::CacheEntry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::MountConfig;
use crate::mapping::PathMapper;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently resident.
    pub entries: usize,
    /// Configured bound.
    pub max_entries: usize,
    /// Lookups that found an existing entry.
    pub hits: u64,
    /// Lookups that created an entry.
    pub misses: u64,
    /// Entries evicted so far.
    pub evictions: u64,
}

/// Path-keyed LRU cache of transcoded files.
///
/// `lookup_or_create` is the only way in: it refuses non-transcodable paths,
/// creates entries on miss, refreshes recency on every touch, and evicts
/// past the bound. Entries are handed out as `Arc<CacheEntry>`; an evicted
/// entry that a reader still holds stays alive (and safe to read) until the
/// reader drops it, but its buffer has been released and the cache will
/// build a fresh entry for the path on the next lookup.
pub struct Cache {
    mapper: PathMapper,
    max_entries: usize,
    entries: Mutex<LruCache<String, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    /// Create an empty cache for the given mount configuration.
    pub fn new(config: &MountConfig) -> Self {
        Self {
            mapper: PathMapper::new(config),
            max_entries: config.max_cache_entries,
            entries: Mutex::new(LruCache::unbounded()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up the entry for `virtual_path`, creating it on first touch.
    ///
    /// Returns `None` for paths that do not participate in transcoding,
    /// regardless of what exists on disk. The touched entry becomes the
    /// most recently used; eviction then trims the least recently used
    /// entries until the bound holds.
    pub fn lookup_or_create(&self, virtual_path: &str) -> Option<Arc<CacheEntry>> {
        if !self.mapper.is_transcodable(virtual_path) {
            return None;
        }
        let mut entries = self.entries.lock();
        let entry = match entries.get(virtual_path) {
            Some(existing) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(path = %virtual_path, "cache hit");
                Arc::clone(existing)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let source = self.mapper.to_source_path(virtual_path);
                debug!(
                    path = %virtual_path,
                    source = %source.display(),
                    "cache miss; creating entry"
                );
                let created = Arc::new(CacheEntry::new(virtual_path, source));
                entries.put(virtual_path.to_string(), Arc::clone(&created));
                created
            }
        };
        self.evict_excess(&mut entries);
        Some(entry)
    }

    /// Evict least-recently-used entries until the bound holds. Runs under
    /// the structural lock; takes each victim's entry lock (via
    /// `release_buffer`) before dropping it, so a reader mid-copy finishes
    /// first.
    fn evict_excess(&self, entries: &mut LruCache<String, Arc<CacheEntry>>) {
        while entries.len() > self.max_entries {
            let Some((path, victim)) = entries.pop_lru() else {
                break;
            };
            victim.release_buffer();
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                path = %path,
                remaining = entries.len(),
                "evicted least recently used entry"
            );
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether an entry for `virtual_path` is resident. Does not refresh
    /// recency.
    pub fn contains(&self, virtual_path: &str) -> bool {
        self.entries.lock().contains(virtual_path)
    }

    /// Configured entry bound.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
