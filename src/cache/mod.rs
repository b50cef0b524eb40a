use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::model::{FileIdentity, MetadataRecord};

mod store;

#[cfg(feature = "rocksdb-cache")]
pub use store::RocksStore;
pub use store::{CacheStore, SnapshotStore};

/// A stored record together with the identity it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: FileIdentity,
    pub record: MetadataRecord,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    corrupt: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub corrupt: u64,
}

/// Concurrent FileIdentity → MetadataRecord map.
///
/// Entries are keyed by path and sharded by DashMap, so workers touching
/// different files never wait on each other. A lookup only hits when the
/// stored identity (path, size, mtime) equals the one the caller just
/// computed; anything else is a miss and the stale entry is dropped.
pub struct MetadataCache {
    entries: DashMap<PathBuf, CacheEntry>,
    next_generation: AtomicU64,
    counters: Counters,
    store: Option<Box<dyn CacheStore>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.entries.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl MetadataCache {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            next_generation: AtomicU64::new(0),
            counters: Counters::default(),
            store: None,
        }
    }

    /// Load whatever the store holds. An unreadable store is logged and the
    /// cache starts cold.
    pub fn with_store(store: Box<dyn CacheStore>) -> Self {
        let cache = Self {
            store: None,
            ..Self::in_memory()
        };

        match store.load() {
            Ok(entries) => {
                let mut max_generation = 0;
                for entry in entries {
                    max_generation = max_generation.max(entry.generation);
                    cache.entries.insert(entry.identity.path.clone(), entry);
                }
                cache
                    .next_generation
                    .store(max_generation, Ordering::SeqCst);
                debug!("Loaded {} cached metadata records", cache.entries.len());
            }
            Err(e) => {
                warn!("Ignoring metadata cache: {}", e);
                cache.counters.corrupt.fetch_add(1, Ordering::Relaxed);
            }
        }

        Self {
            store: Some(store),
            ..cache
        }
    }

    /// Cache persisted as a bincode snapshot at `path`.
    pub fn open_snapshot(path: impl AsRef<Path>) -> Self {
        Self::with_store(Box::new(SnapshotStore::new(path)))
    }

    pub fn get(&self, identity: &FileIdentity) -> Option<MetadataRecord> {
        if let Some(entry) = self.entries.get(&identity.path) {
            if entry.identity == *identity {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Metadata cache hit for {}", identity.path.display());
                return Some(entry.record.clone());
            }
        }

        if self
            .entries
            .remove_if(&identity.path, |_, entry| entry.identity != *identity)
            .is_some()
        {
            trace!("Stale metadata cache entry for {}", identity.path.display());
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `record` for `identity`, returning the entry's generation. The
    /// generation only advances when the identity for the path changed.
    pub fn put(&self, identity: FileIdentity, record: MetadataRecord) -> u64 {
        match self.entries.entry(identity.path.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.identity != identity {
                    entry.identity = identity;
                    entry.generation = self.bump_generation();
                }
                entry.record = record;
                entry.generation
            }
            Entry::Vacant(vacant) => {
                let generation = self.bump_generation();
                vacant.insert(CacheEntry {
                    identity,
                    record,
                    generation,
                });
                generation
            }
        }
    }

    fn bump_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self, path: &Path) -> Option<u64> {
        self.entries.get(path).map(|e| e.generation)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        let removed = self.entries.remove(path).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            corrupt: self.counters.corrupt.load(Ordering::Relaxed),
        }
    }

    /// Write all entries to the backing store, if any.
    pub fn flush(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut entries: Vec<CacheEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
        store.save(&entries)?;
        debug!("Flushed {} cached metadata records", entries.len());
        Ok(())
    }
}
