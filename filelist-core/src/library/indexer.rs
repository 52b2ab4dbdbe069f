//! `src/library/indexer.rs`
//!
//! Optional cache of per-library listings, consulted by the library walk so
//! a library does not have to be re-opened every time it is listed.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::library::reader::DatablockInfo;

#[derive(Debug, Clone)]
pub enum IndexLookup {
    /// Previously stored listing of every data-block in the library.
    Hit(Arc<Vec<DatablockInfo>>),
    Miss,
}

impl IndexLookup {
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

pub trait FileIndexer: Send + Sync + Debug {
    fn read_index(&self, library: &Path) -> IndexLookup;

    /// Store a fresh listing after a miss.
    fn update_index(&self, library: &Path, datablocks: &[DatablockInfo]);

    /// The walk that used this indexer ran to completion.
    fn finished(&self) {}
}

/// Always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexer;

impl FileIndexer for NoopIndexer {
    fn read_index(&self, _library: &Path) -> IndexLookup {
        IndexLookup::Miss
    }

    fn update_index(&self, _library: &Path, _datablocks: &[DatablockInfo]) {}
}
