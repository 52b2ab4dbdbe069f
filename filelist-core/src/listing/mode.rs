//! `src/listing/mode.rs`
//! ============================================================================
//! # Listing modes
//!
//! One [`ListingBehavior`] per [`ListingMode`]: how a root is validated,
//! which filter predicate applies, what the filter needs prepared, and how
//! the read job fills the entry store.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use bitflags::bitflags;
use enum_map::Enum;
use serde::{Deserialize, Serialize};

use crate::asset::library::AssetLibrary;
use crate::fs::paths::is_dir_or_library;
use crate::listing::filter::{
    FilterConfig, asset_library_included, file_included, lib_included, main_assets_included,
    main_included,
};
use crate::model::entry::InternEntry;
use crate::operators::asset_walk;
use crate::operators::dir_walk;
use crate::operators::read_job::ReadJobRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Enum)]
#[serde(rename_all = "snake_case")]
pub enum ListingMode {
    /// Plain directory browsing.
    #[default]
    Dir,
    /// Directories plus the contents of library files.
    Library,
    /// Data of the currently open file.
    MainData,
    /// Assets of the currently open file only.
    MainAssets,
    /// One configured asset library.
    AssetLibrary,
    /// Every configured asset library plus the open file.
    AllAssetLibraries,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeTags: u8 {
        /// Shows in-memory data; refreshed on a main-data change.
        const USES_MAIN_DATA = 1 << 0;
        /// Must be read on the calling thread.
        const NO_THREADS     = 1 << 1;
    }
}

impl ListingMode {
    pub const ALL: [Self; 6] = [
        Self::Dir,
        Self::Library,
        Self::MainData,
        Self::MainAssets,
        Self::AssetLibrary,
        Self::AllAssetLibraries,
    ];

    #[must_use]
    pub fn behavior(self) -> &'static dyn ListingBehavior {
        match self {
            Self::Dir => &DirListing,
            Self::Library => &LibraryListing,
            Self::MainData => &MainDataListing,
            Self::MainAssets => &MainAssetsListing,
            Self::AssetLibrary => &AssetLibraryListing,
            Self::AllAssetLibraries => &AllAssetLibrariesListing,
        }
    }

    #[must_use]
    pub const fn is_asset_mode(self) -> bool {
        matches!(self, Self::MainAssets | Self::AssetLibrary | Self::AllAssetLibraries)
    }
}

pub trait ListingBehavior: Send + Sync + Debug {
    fn check_dir(&self, dir: &Path) -> bool;

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool;

    /// Called once before every filter pass.
    fn prepare_filter(&self, _config: &mut FilterConfig, _libraries: &[Arc<AssetLibrary>]) {}

    fn tags(&self) -> ModeTags {
        ModeTags::empty()
    }

    /// Fill the entry store. Runs on the read-job thread unless the mode is
    /// tagged [`ModeTags::NO_THREADS`].
    fn read(&self, run: &mut ReadJobRun);
}

#[derive(Debug)]
struct DirListing;

impl ListingBehavior for DirListing {
    fn check_dir(&self, dir: &Path) -> bool {
        dir.is_dir()
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        file_included(entry, config)
    }

    fn read(&self, run: &mut ReadJobRun) {
        let root = run.settings.root.clone();
        dir_walk::walk(run, &root, false, true);
    }
}

#[derive(Debug)]
struct LibraryListing;

impl ListingBehavior for LibraryListing {
    fn check_dir(&self, dir: &Path) -> bool {
        is_dir_or_library(dir)
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        lib_included(entry, config)
    }

    fn read(&self, run: &mut ReadJobRun) {
        let root = run.settings.root.clone();
        dir_walk::walk(run, &root, true, true);
    }
}

#[derive(Debug)]
struct MainDataListing;

impl ListingBehavior for MainDataListing {
    fn check_dir(&self, dir: &Path) -> bool {
        is_dir_or_library(dir)
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        main_included(entry, config)
    }

    fn read(&self, run: &mut ReadJobRun) {
        let root = run.settings.root.clone();
        dir_walk::walk(run, &root, false, true);
    }
}

#[derive(Debug)]
struct MainAssetsListing;

impl ListingBehavior for MainAssetsListing {
    fn check_dir(&self, _dir: &Path) -> bool {
        true
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        main_assets_included(entry, config)
    }

    fn prepare_filter(&self, config: &mut FilterConfig, libraries: &[Arc<AssetLibrary>]) {
        config.prepare_catalogs(libraries);
    }

    fn tags(&self) -> ModeTags {
        ModeTags::USES_MAIN_DATA | ModeTags::NO_THREADS
    }

    fn read(&self, run: &mut ReadJobRun) {
        asset_walk::read_main_assets(run);
    }
}

#[derive(Debug)]
struct AssetLibraryListing;

impl ListingBehavior for AssetLibraryListing {
    fn check_dir(&self, dir: &Path) -> bool {
        is_dir_or_library(dir)
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        asset_library_included(entry, config)
    }

    fn prepare_filter(&self, config: &mut FilterConfig, libraries: &[Arc<AssetLibrary>]) {
        config.prepare_catalogs(libraries);
    }

    fn tags(&self) -> ModeTags {
        ModeTags::USES_MAIN_DATA
    }

    fn read(&self, run: &mut ReadJobRun) {
        asset_walk::read_asset_library(run);
    }
}

#[derive(Debug)]
struct AllAssetLibrariesListing;

impl ListingBehavior for AllAssetLibrariesListing {
    fn check_dir(&self, _dir: &Path) -> bool {
        true
    }

    fn is_included(&self, entry: &InternEntry, config: &FilterConfig) -> bool {
        asset_library_included(entry, config)
    }

    fn prepare_filter(&self, config: &mut FilterConfig, libraries: &[Arc<AssetLibrary>]) {
        config.prepare_catalogs(libraries);
    }

    fn tags(&self) -> ModeTags {
        ModeTags::USES_MAIN_DATA
    }

    fn read(&self, run: &mut ReadJobRun) {
        asset_walk::read_all_asset_libraries(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::TypeFlags;
    use tempfile::TempDir;

    #[test]
    fn test_check_dir_per_mode() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("props.blend");
        std::fs::write(&lib, b"").unwrap();
        let missing = tmp.path().join("missing");

        assert!(ListingMode::Dir.behavior().check_dir(tmp.path()));
        assert!(!ListingMode::Dir.behavior().check_dir(&lib));
        assert!(ListingMode::Library.behavior().check_dir(&lib));
        assert!(!ListingMode::Library.behavior().check_dir(&missing));
        assert!(ListingMode::MainAssets.behavior().check_dir(&missing));
        assert!(ListingMode::AllAssetLibraries.behavior().check_dir(&missing));
    }

    #[test]
    fn test_tags() {
        assert_eq!(
            ListingMode::MainAssets.behavior().tags(),
            ModeTags::USES_MAIN_DATA | ModeTags::NO_THREADS
        );
        assert!(ListingMode::Dir.behavior().tags().is_empty());
        assert!(
            ListingMode::AssetLibrary
                .behavior()
                .tags()
                .contains(ModeTags::USES_MAIN_DATA)
        );
    }

    #[test]
    fn test_mode_predicates_differ() {
        let config = FilterConfig::default();
        let mut datablock = InternEntry::new("Object/.hidden", TypeFlags::BLENDERLIB);
        datablock.attributes |= crate::model::entry::FileAttributes::HIDDEN;

        // Hidden data-blocks stay hidden in library listings.
        assert!(!ListingMode::Library.behavior().is_included(&datablock, &config));
        let visible = InternEntry::new("notes.txt", TypeFlags::TEXT);
        assert!(ListingMode::Dir.behavior().is_included(&visible, &config));
    }
}
