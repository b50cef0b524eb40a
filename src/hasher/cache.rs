use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use super::{full_hash, quick_hash, ContentHash};
use crate::error::Result;
use crate::model::FileIdentity;

#[derive(Debug, Clone, Copy, Default)]
struct Hashes {
    quick: Option<u64>,
    full: Option<ContentHash>,
}

/// Remembers fingerprints per FileIdentity, so a file that has not changed
/// is never read twice.
#[derive(Debug, Default)]
pub struct HashCache {
    hashes: DashMap<FileIdentity, Hashes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quick(&self, identity: &FileIdentity) -> Result<u64> {
        if let Some(hash) = self.hashes.get(identity).and_then(|h| h.quick) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Quick hash cached for {}", identity.path.display());
            return Ok(hash);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let hash = quick_hash(&identity.path)?;
        self.hashes.entry(identity.clone()).or_default().quick = Some(hash);
        Ok(hash)
    }

    pub fn full(&self, identity: &FileIdentity) -> Result<ContentHash> {
        if let Some(hash) = self.hashes.get(identity).and_then(|h| h.full) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Full hash cached for {}", identity.path.display());
            return Ok(hash);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let hash = full_hash(&identity.path)?;
        self.hashes.entry(identity.clone()).or_default().full = Some(hash);
        Ok(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
