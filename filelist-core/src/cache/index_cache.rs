//! `src/cache/index_cache.rs`
//! ============================================================================
//! # In-memory library index
//!
//! A [`FileIndexer`] backed by a `moka` sync cache keyed by library path.
//! - Capacity and TTL bounded
//! - Entries invalidated when the library file's mtime changes
//! - Hit/miss/store/eviction statistics

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use moka::sync::Cache;
use tracing::{debug, info, instrument};

use crate::config::CacheConfig;
use crate::library::indexer::{FileIndexer, IndexLookup};
use crate::library::reader::DatablockInfo;

/// Index statistics for monitoring and debugging
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    finished_walks: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        self.finished_walks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            finished_walks: self.finished_walks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub finished_walks: u64,
}

impl CacheStatsSnapshot {
    #[expect(clippy::cast_precision_loss, reason = "Expected precision loss")]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedLibrary {
    mtime: Option<SystemTime>,
    datablocks: Arc<Vec<DatablockInfo>>,
}

fn library_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

#[derive(Debug, Clone)]
pub struct MemoryIndexer {
    inner: Cache<PathBuf, IndexedLibrary>,
    stats: Arc<CacheStats>,
    enable_stats: bool,
}

impl Default for MemoryIndexer {
    fn default() -> Self {
        Self::with_config(&CacheConfig::default())
    }
}

impl MemoryIndexer {
    #[must_use]
    pub fn with_config(config: &CacheConfig) -> Self {
        let stats = Arc::new(CacheStats::default());
        let builder = Cache::builder()
            .max_capacity(config.index_capacity)
            .time_to_live(config.index_ttl);

        let inner = if config.enable_stats {
            let stats_clone = Arc::clone(&stats);
            builder
                .eviction_listener(move |_key, _value, cause| {
                    if cause.was_evicted() {
                        stats_clone.record_eviction();
                    }
                })
                .build()
        } else {
            builder.build()
        };

        Self {
            inner,
            stats,
            enable_stats: config.enable_stats,
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn invalidate(&self, library: &Path) {
        self.inner.invalidate(library);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        info!(
            marker = "INDEX_CACHE_CLEARED",
            operation_type = "index_cache",
            "Library index cleared"
        );
    }

    fn record(&self, record: impl FnOnce(&CacheStats)) {
        if self.enable_stats {
            record(&self.stats);
        }
    }
}

impl FileIndexer for MemoryIndexer {
    #[instrument(level = "debug", skip(self), fields(library = %library.display()))]
    fn read_index(&self, library: &Path) -> IndexLookup {
        let Some(indexed) = self.inner.get(library) else {
            self.record(CacheStats::record_miss);
            debug!(
                marker = "INDEX_CACHE",
                operation_type = "index_miss",
                "Library not indexed"
            );
            return IndexLookup::Miss;
        };

        if indexed.mtime != library_mtime(library) {
            self.inner.invalidate(library);
            self.record(CacheStats::record_invalidation);
            self.record(CacheStats::record_miss);
            debug!(
                marker = "INDEX_CACHE",
                operation_type = "index_stale",
                "Library changed since it was indexed"
            );
            return IndexLookup::Miss;
        }

        self.record(CacheStats::record_hit);
        debug!(
            marker = "INDEX_CACHE",
            operation_type = "index_hit",
            datablocks = indexed.datablocks.len(),
            "Library listing served from index"
        );
        IndexLookup::Hit(indexed.datablocks)
    }

    #[instrument(level = "debug", skip(self, datablocks), fields(library = %library.display(), count = datablocks.len()))]
    fn update_index(&self, library: &Path, datablocks: &[DatablockInfo]) {
        self.inner.insert(
            library.to_path_buf(),
            IndexedLibrary {
                mtime: library_mtime(library),
                datablocks: Arc::new(datablocks.to_vec()),
            },
        );
        self.record(CacheStats::record_store);
    }

    fn finished(&self) {
        self.record(CacheStats::record_finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id_code::IdCode;
    use std::time::Duration;
    use tempfile::TempDir;

    fn datablocks() -> Vec<DatablockInfo> {
        vec![
            DatablockInfo::new(IdCode::Object, "Cube"),
            DatablockInfo::new(IdCode::Mesh, "CubeMesh"),
        ]
    }

    #[test]
    fn test_miss_then_hit() {
        let indexer = MemoryIndexer::default();
        let path = Path::new("/nowhere/lib.blend");

        assert!(!indexer.read_index(path).is_hit());
        indexer.update_index(path, &datablocks());

        let IndexLookup::Hit(found) = indexer.read_index(path) else {
            panic!("expected an index hit");
        };
        assert_eq!(found.len(), 2);

        let stats = indexer.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_changed_library_is_reindexed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lib.blend");
        fs::write(&path, b"v1").unwrap();

        let indexer = MemoryIndexer::default();
        indexer.update_index(&path, &datablocks());
        assert!(indexer.read_index(&path).is_hit());

        let later = SystemTime::now() + Duration::from_secs(120);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(!indexer.read_index(&path).is_hit());
        assert_eq!(indexer.stats().invalidations, 1);
    }

    #[test]
    fn test_stats_disabled() {
        let config = CacheConfig {
            enable_stats: false,
            ..CacheConfig::default()
        };
        let indexer = MemoryIndexer::with_config(&config);
        indexer.read_index(Path::new("/x.blend"));
        indexer.finished();
        assert_eq!(indexer.stats(), CacheStatsSnapshot {
            hits: 0,
            misses: 0,
            stores: 0,
            evictions: 0,
            invalidations: 0,
            finished_walks: 0,
        });
    }
}
