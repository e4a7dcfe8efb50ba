use crate::diagnostics::Diagnostic;
use crate::digest::Digest;
use crate::meta::ModuleMeta;
use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// The process-lifetime module cache shared by every driver invocation.
pub fn global_memory_cache() -> &'static MemoryCache {
    static CACHE: OnceLock<MemoryCache> = OnceLock::new();
    CACHE.get_or_init(MemoryCache::new)
}

/// One memoized module analysis.
#[derive(Debug, Clone)]
pub struct MemEntry {
    pub content_hash: Digest,
    pub meta: Arc<ModuleMeta>,
    pub broken: bool,
    pub first_err: Option<Diagnostic>,
}

/// Hit/miss counters, reported on the metrics line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-lifetime module cache keyed by canonical module path.
///
/// A lookup only hits when the stored content hash equals the queried
/// one, so stale entries self-invalidate. Multi-reader/single-writer;
/// no user callback ever runs under the write lock.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<AHashMap<String, MemEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    /// Fetch a module by fingerprint. Misses when the path is unknown or
    /// the stored hash differs.
    pub fn get(&self, path: &str, content_hash: &Digest) -> Option<MemEntry> {
        let entries = self.entries.read().expect("module cache poisoned");
        let found = entries
            .get(path)
            .filter(|entry| entry.content_hash == *content_hash)
            .cloned();
        drop(entries);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a module analysis, overwriting any entry under the same
    /// path.
    pub fn put(&self, meta: Arc<ModuleMeta>, broken: bool, first_err: Option<Diagnostic>) {
        let entry = MemEntry {
            content_hash: meta.content_hash,
            meta: Arc::clone(&meta),
            broken,
            first_err,
        };
        let mut entries = self.entries.write().expect("module cache poisoned");
        entries.insert(meta.path.clone(), entry);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .expect("module cache poisoned")
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().expect("module cache poisoned").len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
