//! `src/library/main_data.rs`
//!
//! Source of the data-blocks living in the currently open file. The host
//! owns that data; listings only read a snapshot of it.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use parking_lot::RwLock;

use crate::asset::library::AssetMetaData;
use crate::model::id_code::IdCode;
use crate::preview::thumbnail::PreviewImage;

#[derive(Debug, Clone)]
pub struct MainDataItem {
    pub id_code: IdCode,
    pub name: CompactString,
    pub asset: Option<AssetMetaData>,
    /// Already rendered preview, if the host has one.
    pub preview: Option<PreviewImage>,
}

impl MainDataItem {
    #[must_use]
    pub fn new(id_code: IdCode, name: impl Into<CompactString>) -> Self {
        Self {
            id_code,
            name: name.into(),
            asset: None,
            preview: None,
        }
    }

    #[must_use]
    pub fn with_asset(mut self, asset: AssetMetaData) -> Self {
        self.asset = Some(asset);
        self
    }

    #[must_use]
    pub fn with_preview(mut self, preview: PreviewImage) -> Self {
        self.preview = Some(preview);
        self
    }
}

pub trait MainDataSource: Send + Sync + Debug {
    /// Path of the open file; `None` while unsaved.
    fn file_path(&self) -> Option<PathBuf>;

    fn items(&self) -> Vec<MainDataItem>;

    /// Items carrying asset metadata.
    fn asset_items(&self) -> Vec<MainDataItem> {
        self.items()
            .into_iter()
            .filter(|item| item.asset.is_some())
            .collect()
    }
}

/// No open file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMainData;

impl MainDataSource for NoMainData {
    fn file_path(&self) -> Option<PathBuf> {
        None
    }

    fn items(&self) -> Vec<MainDataItem> {
        Vec::new()
    }
}

/// Mutable in-memory stand-in for the host's open file.
#[derive(Debug, Default)]
pub struct InMemoryMain {
    path: RwLock<Option<PathBuf>>,
    items: RwLock<Vec<MainDataItem>>,
}

impl InMemoryMain {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: RwLock::new(path),
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn set_file_path(&self, path: Option<&Path>) {
        *self.path.write() = path.map(Path::to_path_buf);
    }

    pub fn add(&self, item: MainDataItem) {
        self.items.write().push(item);
    }

    /// Remove items by type and name; returns how many went.
    pub fn remove(&self, id_code: IdCode, name: &str) -> usize {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| !(item.id_code == id_code && item.name == name));
        before - items.len()
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }
}

impl MainDataSource for InMemoryMain {
    fn file_path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    fn items(&self) -> Vec<MainDataItem> {
        self.items.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_items_filter() {
        let main = InMemoryMain::new(Some(PathBuf::from("/project/scene.blend")));
        main.add(MainDataItem::new(IdCode::Object, "Cube"));
        main.add(MainDataItem::new(IdCode::Material, "Steel").with_asset(AssetMetaData::default()));

        assert_eq!(main.items().len(), 2);
        let assets = main.asset_items();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].name, "Steel");

        assert_eq!(main.remove(IdCode::Object, "Cube"), 1);
        assert_eq!(main.items().len(), 1);
        assert_eq!(main.file_path(), Some(PathBuf::from("/project/scene.blend")));
    }
}
