//! `src/library/reader.rs`
//! ============================================================================
//! # Library file access
//!
//! The binary library format is not parsed here. A [`LibraryReader`] opens a
//! library file and hands back a [`LibraryHandle`] that lists the linkable
//! groups and the data-blocks inside each group. Dropping the handle closes
//! the library.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use compact_str::CompactString;
use enum_map::EnumMap;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asset::library::AssetMetaData;
use crate::error::{CoreError, CoreResult};
use crate::model::id_code::IdCode;

/// One data-block as listed by a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatablockInfo {
    pub name: CompactString,
    pub id_code: IdCode,
    #[serde(default)]
    pub asset: Option<AssetMetaData>,
    /// The library stores a preview image for this data-block.
    #[serde(default)]
    pub has_preview: bool,
}

impl DatablockInfo {
    #[must_use]
    pub fn new(id_code: IdCode, name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            id_code,
            asset: None,
            has_preview: false,
        }
    }

    #[must_use]
    pub fn with_asset(mut self, asset: AssetMetaData) -> Self {
        self.asset = Some(asset);
        self
    }

    #[must_use]
    pub const fn with_preview(mut self) -> Self {
        self.has_preview = true;
        self
    }
}

/// An open library file.
pub trait LibraryHandle: Send {
    /// Group types that have at least one linkable data-block.
    fn linkable_groups(&mut self) -> Vec<IdCode>;

    /// Data-blocks of one group; with `assets_only` only those carrying
    /// asset metadata.
    fn datablocks(&mut self, id_code: IdCode, assets_only: bool) -> Vec<DatablockInfo>;
}

pub trait LibraryReader: Send + Sync + Debug {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn LibraryHandle>>;
}

/// Reader for hosts that cannot open libraries: every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLibraryReader;

impl LibraryReader for NullLibraryReader {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn LibraryHandle>> {
        Err(CoreError::library_open(
            &path.to_string_lossy(),
            "no library reader configured",
        ))
    }
}

type GroupedDatablocks = EnumMap<IdCode, Vec<DatablockInfo>>;

/// Libraries registered in memory by path. Useful for hosts that already
/// have the listings at hand, and for tests.
#[derive(Debug, Default)]
pub struct MemoryLibraryReader {
    libraries: RwLock<HashMap<PathBuf, GroupedDatablocks>>,
    opens: AtomicUsize,
}

impl MemoryLibraryReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the contents of the library at `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, datablocks: impl IntoIterator<Item = DatablockInfo>) {
        let mut grouped = GroupedDatablocks::default();
        for datablock in datablocks {
            grouped[datablock.id_code].push(datablock);
        }
        self.libraries.write().insert(path.into(), grouped);
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.libraries.write().remove(path).is_some()
    }

    /// Successful opens so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl LibraryReader for MemoryLibraryReader {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn LibraryHandle>> {
        let grouped = self
            .libraries
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::library_open(&path.to_string_lossy(), "unknown library"))?;

        self.opens.fetch_add(1, Ordering::Relaxed);
        debug!(
            marker = "LIBRARY_OPENED",
            operation_type = "library_read",
            path = %path.display(),
            "Opened in-memory library"
        );
        Ok(Box::new(MemoryLibraryHandle { grouped }))
    }
}

struct MemoryLibraryHandle {
    grouped: GroupedDatablocks,
}

impl LibraryHandle for MemoryLibraryHandle {
    fn linkable_groups(&mut self) -> Vec<IdCode> {
        self.grouped
            .iter()
            .filter(|(_, datablocks)| !datablocks.is_empty())
            .map(|(id_code, _)| id_code)
            .collect()
    }

    fn datablocks(&mut self, id_code: IdCode, assets_only: bool) -> Vec<DatablockInfo> {
        self.grouped[id_code]
            .iter()
            .filter(|datablock| !assets_only || datablock.asset.is_some())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_reader_always_fails() {
        let err = NullLibraryReader.open(Path::new("/x.blend")).err().unwrap();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_memory_reader_groups_and_filters() {
        let reader = MemoryLibraryReader::new();
        reader.insert(
            "/lib.blend",
            [
                DatablockInfo::new(IdCode::Object, "Cube"),
                DatablockInfo::new(IdCode::Object, "Lamp").with_asset(AssetMetaData::default()),
                DatablockInfo::new(IdCode::Material, "Steel"),
            ],
        );

        let mut handle = reader.open(Path::new("/lib.blend")).unwrap();
        assert_eq!(handle.linkable_groups(), vec![IdCode::Material, IdCode::Object]);
        assert_eq!(handle.datablocks(IdCode::Object, false).len(), 2);

        let assets = handle.datablocks(IdCode::Object, true);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].name, "Lamp");
        assert_eq!(reader.open_count(), 1);

        assert!(reader.open(Path::new("/missing.blend")).is_err());
        assert_eq!(reader.open_count(), 1);
    }
}
