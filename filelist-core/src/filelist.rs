//! `src/filelist.rs`
//! ============================================================================
//! # `FileList`: one listing session
//!
//! Owns the listing parameters, the filter and sort state, the windowed
//! display cache, the preview pipeline, the selection and the current read
//! job. Everything here runs on the consumer thread; the only state shared
//! with the scanner is the [`EntryStore`] and the job's own handle.
//!
//! Typical consumer loop:
//! ```rust,ignore
//! let mut list = FileList::new(context);
//! list.setdir(Path::new("/some/dir"));
//! list.readjob_start();
//! while list.readjob_running() {
//!     list.readjob_update();
//!     list.files_ensure();
//! }
//! list.readjob_finish();
//! let count = list.files_ensure();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::asset::library::{AssetLibrary, AssetLibraryReference, AssetRepresentation};
use crate::cache::entry_cache::{DEFAULT_CACHE_SIZE, DisplayEntry, EntryCache, PreviewContext, window_cache_size};
use crate::config::{Config, RemoteConfig};
use crate::context::ListingContext;
use crate::error::{CoreError, CoreResult};
use crate::fs::paths::{LibraryPath, explode_library_path, nearest_valid_ancestor};
use crate::listing::filter::{CatalogVisibility, FilterConfig, FilterFlags, FilterOptions, filter_entries};
use crate::listing::mode::{ListingMode, ModeTags};
use crate::listing::sort::{SortKey, sort_entries};
use crate::model::entry::{InternEntry, Uid};
use crate::model::entry_store::EntryStore;
use crate::model::selection::{SelectCheck, SelectFlags, SelectOp, Selection};
use crate::operators::dir_walk::MAX_RECURSION;
use crate::operators::read_job::{ReadJob, ReadJobSettings, ReadJobState};
use crate::preview::pipeline::PreviewPipeline;
use crate::remote::downloader::AssetDownloadRequest;
use crate::report::ReportList;

const DEFAULT_PREVIEW_WORKERS: usize = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ListFlags: u8 {
        /// Next read starts from scratch.
        const FORCE_RESET            = 1 << 0;
        /// Next read only refreshes entries mirroring in-memory data.
        const FORCE_RESET_MAIN_FILES = 1 << 1;
        const RELOAD_ASSET_LIBRARY   = 1 << 2;
        const IS_READY               = 1 << 3;
        const IS_PENDING             = 1 << 4;
        const NEED_SORTING           = 1 << 5;
        const NEED_FILTERING         = 1 << 6;
    }
}

#[derive(Debug)]
pub struct FileList {
    context: Arc<ListingContext>,

    mode: ListingMode,
    root: PathBuf,
    max_recursion: u32,
    asset_library_ref: Option<AssetLibraryReference>,
    /// Library the last read loaded; entries hold weak handles into it.
    asset_library: Option<Arc<AssetLibrary>>,
    remote: RemoteConfig,

    filter: FilterConfig,
    sort_key: SortKey,
    invert_sort: bool,
    flags: ListFlags,

    store: Arc<EntryStore>,
    /// Sorted snapshot of the store, valid for `sorted_revision`.
    sorted: Vec<Arc<InternEntry>>,
    sorted_revision: u64,
    /// `None` until the next filter pass.
    filtered: Option<Vec<Arc<InternEntry>>>,

    cache: EntryCache,
    previews: PreviewPipeline,
    selection: Selection,

    job: Option<ReadJob>,
    reports: ReportList,
}

impl FileList {
    #[must_use]
    pub fn new(context: Arc<ListingContext>) -> Self {
        let previews = PreviewPipeline::new(Arc::clone(&context.thumbnails), DEFAULT_PREVIEW_WORKERS);
        Self {
            context,
            mode: ListingMode::default(),
            root: PathBuf::new(),
            max_recursion: 0,
            asset_library_ref: None,
            asset_library: None,
            remote: RemoteConfig::default(),
            filter: FilterConfig::default(),
            sort_key: SortKey::default(),
            invert_sort: false,
            flags: ListFlags::FORCE_RESET,
            store: Arc::new(EntryStore::new()),
            sorted: Vec::new(),
            sorted_revision: 0,
            filtered: None,
            cache: EntryCache::new(DEFAULT_CACHE_SIZE),
            previews,
            selection: Selection::new(),
            job: None,
            reports: ReportList::new(),
        }
    }

    /// Listing preset from the `[listing]`, `[cache]`, `[previews]` and
    /// `[remote]` config sections.
    #[must_use]
    pub fn from_config(context: Arc<ListingContext>, config: &Config) -> Self {
        let mut list = Self::new(context);
        list.previews = PreviewPipeline::new(Arc::clone(&list.context.thumbnails), config.previews.workers);
        list.remote = config.remote.clone();
        list.cache = EntryCache::new(config.cache.block_window.min(config.cache.max_window));

        let listing = &config.listing;
        list.max_recursion = listing.recursion_level();
        list.sort_key = listing.sort;
        list.invert_sort = listing.invert_sort;
        list.set_filter(&FilterOptions {
            hide_dot: listing.hide_dot,
            hide_parent: listing.hide_parent,
            filter_glob: listing.filter_glob.as_str().into(),
            ..FilterOptions::default()
        });
        if let Some(root) = &listing.root {
            list.setdir(root);
        }
        list
    }

    // ------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------

    #[must_use]
    pub const fn mode(&self) -> ListingMode {
        self.mode
    }

    fn tags(&self) -> ModeTags {
        self.mode.behavior().tags()
    }

    pub fn settype(&mut self, mode: ListingMode) {
        if self.mode == mode {
            return;
        }
        debug!(
            marker = "FILELIST_TYPE_CHANGED",
            operation_type = "filelist",
            from = ?self.mode,
            to = ?mode,
            "Listing mode changed"
        );
        self.mode = mode;
        self.tag_force_reset();
    }

    /// Validate `dir` for the current mode. With `do_change`, an invalid
    /// directory is replaced by its nearest valid ancestor, or the working
    /// directory as a last resort.
    pub fn check_dir(&self, dir: &mut PathBuf, do_change: bool) -> bool {
        let behavior = self.mode.behavior();
        if behavior.check_dir(dir) {
            return true;
        }
        if !do_change {
            return false;
        }

        let replacement = nearest_valid_ancestor(dir, |path| behavior.check_dir(path))
            .or_else(|| std::env::current_dir().ok());
        if let Some(replacement) = replacement {
            *dir = replacement;
        }
        false
    }

    /// Set the listing root and return the root actually used. Invalid
    /// directories fall back to a valid ancestor unless an asset library is
    /// targeted, in which case the root is kept as given.
    pub fn setdir(&mut self, dir: impl AsRef<Path>) -> &Path {
        let allow_invalid = self.asset_library_ref.is_some();
        let mut dir = dir.as_ref().to_path_buf();
        self.check_dir(&mut dir, !allow_invalid);

        if self.root != dir {
            self.root = dir;
            self.tag_force_reset();
        }
        &self.root
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn setrecursion(&mut self, level: u32) {
        let level = level.min(MAX_RECURSION);
        if self.max_recursion != level {
            self.max_recursion = level;
            self.tag_force_reset();
        }
    }

    #[must_use]
    pub const fn max_recursion(&self) -> u32 {
        self.max_recursion
    }

    /// Asset listings always show library contents flat.
    const fn read_recursion(&self) -> u32 {
        if self.mode.is_asset_mode() {
            MAX_RECURSION
        } else {
            self.max_recursion
        }
    }

    /// Target an asset library. A configured library also moves the root to
    /// the library's directory.
    pub fn setlibrary(&mut self, reference: Option<AssetLibraryReference>) {
        if self.asset_library_ref == reference {
            return;
        }

        if let Some(AssetLibraryReference::Custom(name)) = &reference {
            if let Some(definition) = self.context.asset_libraries.definition(name) {
                self.root = definition.path;
            }
        }
        self.asset_library_ref = reference;
        self.tag_force_reset();
    }

    #[must_use]
    pub const fn asset_library_ref(&self) -> Option<&AssetLibraryReference> {
        self.asset_library_ref.as_ref()
    }

    #[must_use]
    pub const fn asset_library(&self) -> Option<&Arc<AssetLibrary>> {
        self.asset_library.as_ref()
    }

    pub fn set_filter(&mut self, options: &FilterOptions) {
        if self.filter.set_options(options) {
            self.flags |= ListFlags::NEED_FILTERING;
        }
    }

    pub fn set_asset_catalog_filter(&mut self, visibility: CatalogVisibility) {
        if self.filter.set_catalog_visibility(visibility) {
            self.flags |= ListFlags::NEED_FILTERING;
        }
    }

    #[must_use]
    pub const fn filter_config(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn set_sorting(&mut self, key: SortKey, invert: bool) {
        if self.sort_key != key || self.invert_sort != invert {
            self.sort_key = key;
            self.invert_sort = invert;
            self.flags |= ListFlags::NEED_SORTING;
        }
    }

    #[must_use]
    pub const fn sorting(&self) -> (SortKey, bool) {
        (self.sort_key, self.invert_sort)
    }

    /// The root is a library file or a path inside one, or an asset library
    /// is loaded.
    #[must_use]
    pub fn islibrary(&self) -> bool {
        self.asset_library.is_some() || explode_library_path(&self.root).is_some()
    }

    #[must_use]
    pub fn library_path(&self) -> Option<LibraryPath> {
        explode_library_path(&self.root)
    }

    /// Whether `path` is a valid root for the current mode.
    #[must_use]
    pub fn is_dir(&self, path: &Path) -> bool {
        self.mode.behavior().check_dir(path)
    }

    #[must_use]
    pub const fn flags(&self) -> ListFlags {
        self.flags
    }

    #[must_use]
    pub const fn reports(&self) -> &ReportList {
        &self.reports
    }

    // ------------------------------------------------------------
    // Reset tags
    // ------------------------------------------------------------

    pub fn tag_force_reset(&mut self) {
        self.flags |= ListFlags::FORCE_RESET;
    }

    /// In-memory data changed. Only listings showing it care.
    pub fn tag_force_reset_main_files(&mut self) {
        if self.tags().contains(ModeTags::USES_MAIN_DATA) {
            self.flags |= ListFlags::FORCE_RESET_MAIN_FILES;
        }
    }

    pub fn tag_reload_asset_library(&mut self) {
        self.flags |= ListFlags::RELOAD_ASSET_LIBRARY;
        self.tag_force_reset();
    }

    #[must_use]
    pub const fn needs_force_reset(&self) -> bool {
        self.flags
            .intersects(ListFlags::FORCE_RESET.union(ListFlags::FORCE_RESET_MAIN_FILES))
    }

    #[must_use]
    pub fn needs_reading(&self) -> bool {
        self.store.is_unset() || self.needs_force_reset()
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.flags.contains(ListFlags::IS_READY)
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.flags.contains(ListFlags::IS_PENDING)
    }

    // ------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------

    fn cache_clear(&mut self, size: usize) {
        self.previews.clear();
        self.cache.clear(size);
    }

    /// Release the assets our entries registered with their libraries.
    fn release_assets(&self) {
        let mut released = 0_usize;
        for entry in self.store.snapshot() {
            let Some(asset) = entry.asset() else {
                continue;
            };
            if self.owning_library(&asset).is_some_and(|library| library.remove_asset(&asset)) {
                released += 1;
            }
        }
        if released > 0 {
            debug!(
                marker = "FILELIST_ASSETS_RELEASED",
                operation_type = "filelist",
                released = released,
                "Released listed assets"
            );
        }
    }

    fn owning_library(&self, asset: &AssetRepresentation) -> Option<Arc<AssetLibrary>> {
        if asset.is_local {
            return Some(self.context.asset_libraries.current_file_library());
        }
        let root = asset.library_root.as_deref()?;
        if let Some(library) = &self.asset_library {
            if library.root_path() == Some(root) {
                return Some(Arc::clone(library));
            }
        }
        self.context.asset_libraries.library_for_path(root)
    }

    fn clear_ex(&mut self, do_asset_library: bool, do_cache: bool, do_selection: bool) {
        if !self.store.is_unset() {
            self.release_assets();
        }

        self.filtered = None;
        if do_cache {
            self.cache_clear(self.cache.size());
        }
        self.sorted.clear();
        self.store.clear();
        self.sorted_revision = self.store.revision();

        if do_selection {
            self.selection.clear();
        }
        if do_asset_library {
            self.asset_library = None;
        }
    }

    /// Drop every entry, the cache, the selection and the loaded library.
    /// UIDs keep counting up.
    pub fn clear(&mut self) {
        self.clear_ex(true, true, true);
    }

    /// Remove only entries mirroring in-memory data; the selection stays.
    fn clear_main_files(&mut self) {
        if !self.tags().contains(ModeTags::USES_MAIN_DATA) || self.store.is_unset() {
            return;
        }
        let removed = self.store.clear_main_data();
        if removed > 0 {
            self.filtered = None;
            self.flags |= ListFlags::NEED_FILTERING;
            self.cache_clear(self.cache.size());
        }
    }

    /// Apply pending reset tags. Does not touch the tags themselves; the next
    /// read consumes them.
    pub fn clear_from_reset_tag(&mut self) {
        if self.flags.contains(ListFlags::FORCE_RESET) {
            self.clear();
        } else if self.flags.contains(ListFlags::FORCE_RESET_MAIN_FILES) {
            self.clear_main_files();
        }
    }

    // ------------------------------------------------------------
    // Sort and filter
    // ------------------------------------------------------------

    fn sort(&mut self) {
        let revision = self.store.revision();
        if !self.flags.contains(ListFlags::NEED_SORTING) && revision == self.sorted_revision {
            return;
        }

        self.sorted = self.store.snapshot();
        sort_entries(&mut self.sorted, self.sort_key, self.invert_sort);
        self.sorted_revision = revision;
        self.flags.remove(ListFlags::NEED_SORTING);
        self.flags |= ListFlags::NEED_FILTERING;
    }

    /// Libraries whose catalogs the filter resolves against.
    fn filter_libraries(&self) -> Vec<Arc<AssetLibrary>> {
        let all = self.mode == ListingMode::AllAssetLibraries
            || (self.mode == ListingMode::AssetLibrary
                && self.asset_library_ref == Some(AssetLibraryReference::All));
        if all {
            return self.context.asset_libraries.all_libraries();
        }
        self.asset_library.iter().cloned().collect()
    }

    fn filter(&mut self) {
        if self.store.is_unset() {
            return;
        }
        if !self.flags.contains(ListFlags::NEED_FILTERING) && self.filtered.is_some() {
            return;
        }

        let behavior = self.mode.behavior();
        let islibrary = self.islibrary();
        self.filter.update_hide_lib_dir(self.read_recursion(), islibrary);
        let libraries = self.filter_libraries();
        behavior.prepare_filter(&mut self.filter, &libraries);

        let filtered = filter_entries(&self.sorted, &self.filter, |entry, config| {
            behavior.is_included(entry, config)
        });
        debug!(
            marker = "FILELIST_FILTERED",
            operation_type = "filelist",
            total = self.sorted.len(),
            visible = filtered.len(),
            "Filtered listing"
        );
        self.filtered = Some(filtered);

        self.cache_clear(self.cache.size());
        self.flags.remove(ListFlags::NEED_FILTERING);
    }

    /// Bring the sorted and filtered view up to date unless a reset is
    /// pending. Returns the number of visible entries.
    pub fn files_ensure(&mut self) -> usize {
        if !self.needs_force_reset() {
            self.sort();
            self.filter();
        }
        self.files_num_entries()
    }

    /// Visible entries; `0` until the first filter pass.
    #[must_use]
    pub fn files_num_entries(&self) -> usize {
        self.filtered.as_ref().map_or(0, Vec::len)
    }

    /// Total entries in the store, visible or not.
    #[must_use]
    pub fn entries_num(&self) -> usize {
        self.store.len()
    }

    // ------------------------------------------------------------
    // Entry access
    // ------------------------------------------------------------

    /// Entry at filtered `index`. With `use_request`, an uncached entry is
    /// materialised into the misc tier; otherwise only cached entries are
    /// returned.
    pub fn file_ex(&mut self, index: usize, use_request: bool) -> Option<&DisplayEntry> {
        let filtered = self.filtered.as_deref()?;
        self.cache
            .file_ex(index, filtered, use_request)
            .map(|entry| &*entry)
    }

    pub fn file(&mut self, index: usize) -> Option<&DisplayEntry> {
        self.file_ex(index, true)
    }

    /// Filtered index of the entry with this relative path.
    #[must_use]
    pub fn find_path(&self, relpath: &str) -> Option<usize> {
        self.filtered
            .as_ref()?
            .iter()
            .position(|entry| entry.relpath == relpath)
    }

    #[must_use]
    pub fn find_uid(&self, uid: Uid) -> Option<usize> {
        if uid == 0 {
            return None;
        }
        if let Some(index) = self.cache.index_of_uid(uid) {
            return Some(index);
        }
        self.filtered
            .as_ref()?
            .iter()
            .position(|entry| entry.uid == uid)
    }

    /// Absolute path of an entry. Assets from external libraries resolve
    /// against their own library root.
    #[must_use]
    pub fn full_path(&self, entry: &DisplayEntry) -> PathBuf {
        entry
            .asset()
            .and_then(|asset| asset.full_path())
            .unwrap_or_else(|| self.root.join(entry.relpath.as_str()))
    }

    // ------------------------------------------------------------
    // Window and previews
    // ------------------------------------------------------------

    /// Centre the cache window on `index` and queue previews around it.
    pub fn cache_block(&mut self, index: usize) -> bool {
        let Some(filtered) = self.filtered.as_deref() else {
            return false;
        };
        let full_refresh = !self.flags.contains(ListFlags::IS_READY);
        let previews = if self.previews.is_active() {
            Some(PreviewContext {
                pipeline: &mut self.previews,
                root: &self.root,
            })
        } else {
            None
        };
        self.cache.cache_block(index, filtered, full_refresh, previews)
    }

    /// Resize the cache for a visible window of `window_size` entries.
    pub fn slidingwindow_set(&mut self, window_size: usize) {
        let size = window_cache_size(window_size);
        if size != self.cache.size() {
            debug!(
                marker = "FILELIST_WINDOW_RESIZED",
                operation_type = "filelist",
                from = self.cache.size(),
                to = size,
                "Cache window resized"
            );
            self.cache_clear(size);
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &EntryCache {
        &self.cache
    }

    /// Turn preview loading on or off. Turning it on waits for the listing
    /// to be ready.
    pub fn previews_set(&mut self, use_previews: bool) {
        if use_previews == self.previews.is_active() {
            return;
        }
        if use_previews {
            if self.is_ready() {
                self.previews.activate();
            }
        } else {
            self.previews.deactivate();
            self.cache.reset_preview_loading();
        }
    }

    /// Move finished previews into the cache. Returns whether any landed.
    pub fn previews_update(&mut self) -> bool {
        self.previews.update(&mut self.cache)
    }

    #[must_use]
    pub fn previews_done(&self) -> bool {
        self.previews.is_active() && self.previews.done()
    }

    #[must_use]
    pub const fn previews_running(&self) -> bool {
        self.previews.running()
    }

    // ------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------

    pub fn select_set(&mut self, uid: Uid, is_dir: bool, op: SelectOp, flag: SelectFlags, check: SelectCheck) {
        self.selection.set(uid, is_dir, op, flag, check);
    }

    pub fn select_index_set(&mut self, index: usize, op: SelectOp, flag: SelectFlags, check: SelectCheck) {
        let Some((uid, is_dir)) = self.file(index).map(|entry| (entry.uid, entry.is_dir())) else {
            return;
        };
        self.select_set(uid, is_dir, op, flag, check);
    }

    /// Apply to every index in `first..=last` (either order). Nothing happens
    /// unless both ends are valid.
    pub fn select_range_set(
        &mut self,
        first: usize,
        last: usize,
        op: SelectOp,
        flag: SelectFlags,
        check: SelectCheck,
    ) {
        let count = self.files_num_entries();
        if first >= count || last >= count {
            return;
        }
        for index in first.min(last)..=first.max(last) {
            self.select_index_set(index, op, flag, check);
        }
    }

    #[must_use]
    pub fn select_get(&self, uid: Uid, is_dir: bool, check: SelectCheck) -> SelectFlags {
        self.selection.get(uid, is_dir, check)
    }

    pub fn select_index_get(&mut self, index: usize, check: SelectCheck) -> SelectFlags {
        let Some((uid, is_dir)) = self.file(index).map(|entry| (entry.uid, entry.is_dir())) else {
            return SelectFlags::empty();
        };
        self.select_get(uid, is_dir, check)
    }

    /// Checked against the filtered list, so eviction does not matter.
    #[must_use]
    pub fn is_selected(&self, index: usize, flag: SelectFlags, check: SelectCheck) -> bool {
        let Some(entry) = self.filtered.as_ref().and_then(|filtered| filtered.get(index)) else {
            return false;
        };
        self.selection.is_selected(entry.uid, entry.is_dir(), flag, check)
    }

    /// Select the parent entry, which sits first unless parents are hidden.
    pub fn parent_select_set(&mut self, op: SelectOp, flag: SelectFlags, check: SelectCheck) {
        if !self.filter.flags.contains(FilterFlags::HIDE_PARENT) {
            self.select_index_set(0, op, flag, check);
        }
    }

    #[must_use]
    pub const fn selection(&self) -> &Selection {
        &self.selection
    }

    // ------------------------------------------------------------
    // Read job
    // ------------------------------------------------------------

    /// Start reading the root. Pending reset tags are applied first. Partial
    /// reads, modes that must stay on the caller and calls made outside a
    /// tokio runtime read synchronously and finish before returning.
    pub fn readjob_start(&mut self) {
        self.readjob_start_ex(false);
    }

    /// Read synchronously on the calling thread.
    pub fn readjob_run_blocking(&mut self) {
        self.readjob_start_ex(true);
    }

    fn readjob_start_ex(&mut self, force_blocking: bool) {
        if let Some(job) = self.job.take() {
            job.stop();
            // The stopped job may still be inside an append; whatever it
            // flushes from here on is dropped by the store.
            self.store.retire_writers();
        }

        let behavior = self.mode.behavior();
        if !behavior.check_dir(&self.root) {
            self.reports
                .error(format!("Invalid listing root: {}", self.root.display()));
            warn!(
                marker = "FILELIST_INVALID_ROOT",
                operation_type = "filelist",
                root = %self.root.display(),
                mode = ?self.mode,
                "Not reading an invalid root"
            );
            return;
        }

        self.clear_from_reset_tag();

        let only_main_data = self.flags.contains(ListFlags::FORCE_RESET_MAIN_FILES)
            && !self.flags.contains(ListFlags::FORCE_RESET)
            && !self.store.is_unset();
        let reload = self.flags.contains(ListFlags::RELOAD_ASSET_LIBRARY);

        self.flags.remove(
            ListFlags::FORCE_RESET
                | ListFlags::FORCE_RESET_MAIN_FILES
                | ListFlags::RELOAD_ASSET_LIBRARY
                | ListFlags::IS_READY,
        );
        self.flags |= ListFlags::IS_PENDING;

        let mut settings = ReadJobSettings::new(self.root.clone(), self.mode);
        settings.max_recursion = self.read_recursion();
        settings.filter_glob.clone_from(&self.filter.filter_glob);
        settings.only_main_data = only_main_data;
        settings.asset_library.clone_from(&self.asset_library_ref);
        settings.reload_asset_library = reload;
        settings.remote = self.remote.clone();

        info!(
            marker = "FILELIST_READ_START",
            operation_type = "filelist",
            mode = ?self.mode,
            root = %self.root.display(),
            only_main_data = only_main_data,
            reload = reload,
            "Starting listing read"
        );

        let blocking = force_blocking || only_main_data || behavior.tags().contains(ModeTags::NO_THREADS);
        if !blocking {
            match ReadJob::start(
                settings.clone(),
                Arc::clone(&self.context),
                Arc::clone(&self.store),
                self.reports.clone(),
                self.asset_library.clone(),
            ) {
                Ok(job) => {
                    self.job = Some(job);
                    return;
                }
                Err(err) => {
                    debug!(
                        marker = "FILELIST_READ_BLOCKING_FALLBACK",
                        operation_type = "filelist",
                        error = %err,
                        "Reading on the calling thread"
                    );
                }
            }
        }

        self.job = Some(ReadJob::run_blocking(
            &settings,
            &self.context,
            &self.store,
            &self.reports,
            self.asset_library.clone(),
        ));
        self.readjob_finish();
    }

    /// Ask the running job to stop. Call [`Self::readjob_finish`] once it
    /// is no longer running.
    pub fn readjob_stop(&self) {
        if let Some(job) = &self.job {
            job.stop();
        }
    }

    #[must_use]
    pub fn readjob_running(&self) -> bool {
        self.job.as_ref().is_some_and(ReadJob::is_running)
    }

    #[must_use]
    pub fn readjob_progress(&self) -> f32 {
        self.job.as_ref().map_or(0.0, ReadJob::progress)
    }

    #[must_use]
    pub fn readjob_state(&self) -> ReadJobState {
        self.job.as_ref().map_or(ReadJobState::Idle, ReadJob::state)
    }

    /// Pick up what the job produced since the last call. New entries
    /// invalidate the cache and the filtered view, never the selection.
    /// Returns whether anything changed.
    pub fn readjob_update(&mut self) -> bool {
        let Some(job) = &self.job else {
            return false;
        };

        if let Some(library) = job.take_asset_library() {
            self.asset_library = Some(library);
        }

        let changed = job.take_update();
        if changed {
            self.cache_clear(self.cache.size());
            self.filtered = None;
            self.flags |= ListFlags::NEED_SORTING | ListFlags::NEED_FILTERING;
        }
        self.store.mark_valid();
        changed
    }

    /// Final update; the listing becomes ready.
    pub fn readjob_finish(&mut self) {
        self.readjob_update();
        self.flags.remove(ListFlags::IS_PENDING);
        self.flags |= ListFlags::IS_READY;
        info!(
            marker = "FILELIST_READ_FINISHED",
            operation_type = "filelist",
            entries = self.store.len(),
            state = ?self.readjob_state(),
            "Listing read finished"
        );
    }

    /// Wait for a threaded job and finish it.
    pub async fn readjob_wait(&mut self) -> CoreResult<ReadJobState> {
        let Some(job) = self.job.as_mut() else {
            return Ok(ReadJobState::Idle);
        };
        let state = job.wait().await?;
        if self.is_pending() {
            self.readjob_finish();
        }
        Ok(state)
    }

    // ------------------------------------------------------------
    // Remote assets
    // ------------------------------------------------------------

    /// Ask the downloader for the file of the online asset at `index`.
    pub fn request_asset_download(&mut self, index: usize) -> CoreResult<()> {
        let asset = self
            .file(index)
            .ok_or_else(|| CoreError::invalid_input("index", "no entry at index"))?
            .asset()
            .ok_or_else(|| CoreError::invalid_state("entry is not an asset"))?;
        let online = asset
            .metadata
            .online
            .as_ref()
            .ok_or_else(|| CoreError::invalid_state("asset is not online"))?;
        let library_root = asset
            .library_root
            .clone()
            .ok_or_else(|| CoreError::invalid_state("online asset without library root"))?;
        let library = self
            .owning_library(&asset)
            .ok_or_else(|| CoreError::invalid_state("asset library is not loaded"))?;
        let library_url = library
            .remote_url()
            .ok_or_else(|| CoreError::invalid_state("asset library is not remote"))?;

        let request = AssetDownloadRequest {
            library_url: library_url.into(),
            destination: library_root.join(online.file.as_str()),
            library_root,
            asset_url: online.url.clone(),
            content_hash: online.content_hash.clone(),
        };
        info!(
            marker = "ASSET_DOWNLOAD_REQUESTED",
            operation_type = "remote_download",
            url = %request.asset_url,
            destination = %request.destination.display(),
            "Requesting asset download"
        );
        self.context.downloader.request_asset_file_download(&request)
    }
}

impl Drop for FileList {
    fn drop(&mut self) {
        if let Some(job) = &self.job {
            job.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::asset::library::{AssetLibraryDefinition, AssetLibraryRegistry, AssetMetaData};
    use crate::library::main_data::{InMemoryMain, MainDataItem};
    use crate::library::reader::{DatablockInfo, MemoryLibraryReader};
    use crate::model::entry::TypeFlags;
    use crate::model::id_code::IdCode;
    use crate::preview::thumbnail::{PreviewImage, ThumbSource, ThumbnailLoader};

    fn dir_fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        fs::write(tmp.path().join("b.png"), b"b").unwrap();
        fs::write(tmp.path().join(".hidden"), b"").unwrap();
        tmp
    }

    fn names(list: &mut FileList) -> Vec<String> {
        (0..list.files_num_entries())
            .map(|index| list.file(index).unwrap().relpath.to_string())
            .collect()
    }

    fn read_blocking(list: &mut FileList) -> usize {
        list.readjob_run_blocking();
        list.files_ensure()
    }

    #[test]
    fn test_dir_listing_hides_dot_and_parent() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setdir(tmp.path());
        assert!(list.needs_reading());

        assert_eq!(read_blocking(&mut list), 2);
        assert!(list.is_ready());
        assert!(!list.is_pending());
        assert!(!list.needs_reading());
        assert_eq!(names(&mut list), vec!["a.txt", "b.png"]);
        assert_eq!(list.full_path(list.cache().get(0).unwrap()), tmp.path().join("a.txt"));
    }

    #[test]
    fn test_parent_shown_without_hide_parent() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.setdir(tmp.path());
        read_blocking(&mut list);

        assert_eq!(names(&mut list), vec!["..", "a.txt", "b.png"]);
        list.parent_select_set(SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        assert!(list.is_selected(0, SelectFlags::SELECTED, SelectCheck::All));
    }

    #[test]
    fn test_parent_toggles_with_hide_parent() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.setdir(tmp.path());
        read_blocking(&mut list);
        assert_eq!(list.find_path(".."), Some(0));
        assert_eq!(list.files_num_entries(), 3);

        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        assert_eq!(list.files_ensure(), 2);
        assert!(list.find_path("..").is_none());

        list.set_filter(&FilterOptions {
            hide_dot: true,
            ..FilterOptions::default()
        });
        assert_eq!(list.files_ensure(), 3);
        assert_eq!(list.find_path(".."), Some(0));
        // `.` never shows.
        assert!(list.find_path(".").is_none());
    }

    #[test]
    fn test_filter_glob_marks_operator_files() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            do_filter: true,
            filter: TypeFlags::OPERATOR,
            filter_glob: "*.TXT;*.exr".into(),
            ..FilterOptions::default()
        });
        list.setdir(tmp.path());
        read_blocking(&mut list);

        assert_eq!(names(&mut list), vec!["a.txt"]);
        assert!(list.file(0).unwrap().typeflag.contains(TypeFlags::OPERATOR));
    }

    #[test]
    fn test_sorting_change_reorders() {
        let tmp = dir_fixture();
        fs::write(tmp.path().join("big.txt"), vec![0_u8; 4096]).unwrap();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setdir(tmp.path());
        read_blocking(&mut list);
        assert_eq!(names(&mut list), vec!["a.txt", "b.png", "big.txt"]);

        list.set_sorting(SortKey::Size, false);
        list.files_ensure();
        assert_eq!(list.file(0).unwrap().relpath, "big.txt");
    }

    #[test]
    fn test_selection_survives_refilter_and_eviction() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setdir(tmp.path());
        read_blocking(&mut list);

        let index = list.find_path("b.png").unwrap();
        list.select_index_set(index, SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        let uid = list.file(index).unwrap().uid;

        // Refiltering drops every cached entry.
        list.set_filter(&FilterOptions {
            hide_dot: false,
            hide_parent: true,
            ..FilterOptions::default()
        });
        assert_eq!(list.files_ensure(), 3);
        assert!(list.cache().is_empty());

        let index = list.find_uid(uid).unwrap();
        assert_eq!(list.file(index).unwrap().relpath, "b.png");
        assert!(list.is_selected(index, SelectFlags::SELECTED, SelectCheck::All));
        assert_eq!(
            list.select_index_get(index, SelectCheck::Files),
            SelectFlags::SELECTED
        );
    }

    #[test]
    fn test_select_range_needs_both_ends() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.setdir(tmp.path());
        read_blocking(&mut list);

        list.select_range_set(0, 7, SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        assert!(list.selection().is_empty());

        list.select_range_set(2, 1, SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        assert_eq!(list.selection().len(), 2);
        assert!(!list.is_selected(0, SelectFlags::SELECTED, SelectCheck::All));
    }

    #[test]
    fn test_setdir_falls_back_to_ancestor() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        let root = list.setdir(tmp.path().join("missing/deeper")).to_path_buf();
        assert_eq!(root, tmp.path());
        assert!(list.flags().contains(ListFlags::FORCE_RESET));
    }

    #[test]
    fn test_full_reset_clears_selection_but_not_uids() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.setdir(tmp.path());
        read_blocking(&mut list);
        list.select_index_set(1, SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        let old_uid = list.file(1).unwrap().uid;

        list.setrecursion(1);
        assert!(list.needs_reading());
        // Nothing is rebuilt while a reset is pending.
        assert_eq!(list.files_ensure(), 3);

        read_blocking(&mut list);
        assert!(list.selection().is_empty());
        let index = list.find_path("a.txt").unwrap();
        assert!(list.file(index).unwrap().uid > old_uid);
    }

    #[test]
    fn test_invalid_root_reports_error() {
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.settype(ListingMode::Dir);
        list.readjob_run_blocking();
        assert!(list.reports().has_errors());
        assert!(!list.is_pending());
        assert_eq!(list.files_ensure(), 0);
    }

    #[test]
    fn test_library_listing() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("props.blend");
        fs::write(&lib, b"").unwrap();
        let reader = Arc::new(MemoryLibraryReader::new());
        reader.insert(
            lib.clone(),
            [
                DatablockInfo::new(IdCode::Object, "Cube"),
                DatablockInfo::new(IdCode::Material, "Wood"),
            ],
        );
        let context = ListingContext::default().with_library_reader(reader);

        let mut list = FileList::new(Arc::new(context));
        list.settype(ListingMode::Library);
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setdir(lib.join("Object"));
        assert!(list.islibrary());
        assert_eq!(list.library_path().unwrap().group, Some(IdCode::Object));

        read_blocking(&mut list);
        assert_eq!(names(&mut list), vec!["Cube"]);
    }

    #[derive(Debug)]
    struct PathPreviews;

    impl ThumbnailLoader for PathPreviews {
        fn load(&self, path: &Path, _source: ThumbSource, _offline: bool) -> CoreResult<Option<PreviewImage>> {
            Ok(Some(PreviewImage::new(path.to_string_lossy().into_owned())))
        }
    }

    #[test]
    fn test_previews_wait_for_ready() {
        let tmp = dir_fixture();
        let context = ListingContext::default().with_thumbnails(Arc::new(PathPreviews));
        let mut list = FileList::new(Arc::new(context));
        list.setdir(tmp.path());

        list.previews_set(true);
        assert!(!list.previews_done());

        read_blocking(&mut list);
        list.previews_set(true);
        assert!(list.cache_block(0));
        assert!(list.previews_running());

        let mut landed = false;
        for _ in 0..400 {
            landed |= list.previews_update();
            if list.previews_done() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(landed);
        assert!(list.previews_done());

        let index = list.find_path("b.png").unwrap();
        let expected = tmp.path().join("b.png").to_string_lossy().into_owned();
        let image = list.file(index).unwrap();
        assert_eq!(image.relpath, "b.png");
        let preview = image.preview.as_ref().unwrap();
        assert_eq!(preview.as_bytes(), expected.as_bytes());

        let index = list.find_path("a.txt").unwrap();
        assert!(list.file(index).unwrap().preview.is_none());

        list.previews_set(false);
        assert!(!list.previews_done());
        assert!(!list.previews_running());
    }

    #[test]
    fn test_slidingwindow_resizes_cache() {
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.slidingwindow_set(300);
        assert_eq!(list.cache().size(), 1024);
        list.slidingwindow_set(10);
        assert_eq!(list.cache().size(), DEFAULT_CACHE_SIZE);
    }

    fn asset_library_context(tmp: &TempDir, main: Arc<InMemoryMain>) -> Arc<ListingContext> {
        let lib = tmp.path().join("props.blend");
        fs::write(&lib, b"").unwrap();
        let reader = Arc::new(MemoryLibraryReader::new());
        reader.insert(
            lib,
            [DatablockInfo::new(IdCode::Object, "Cube").with_asset(AssetMetaData::default())],
        );
        let registry = AssetLibraryRegistry::new(vec![AssetLibraryDefinition {
            name: "props".into(),
            path: tmp.path().to_path_buf(),
            remote_url: None,
        }]);
        Arc::new(
            ListingContext::default()
                .with_library_reader(reader)
                .with_main_data(main)
                .with_asset_libraries(Arc::new(registry)),
        )
    }

    #[test]
    fn test_main_data_reset_keeps_selection() {
        let tmp = TempDir::new().unwrap();
        let main = Arc::new(InMemoryMain::new(Some(tmp.path().join("current.blend"))));
        main.add(MainDataItem::new(IdCode::Material, "Wood").with_asset(AssetMetaData::default()));
        let context = asset_library_context(&tmp, Arc::clone(&main));

        let mut list = FileList::new(context);
        list.settype(ListingMode::AssetLibrary);
        list.setlibrary(Some(AssetLibraryReference::Custom("props".into())));
        assert_eq!(list.root(), tmp.path());
        read_blocking(&mut list);

        assert!(list.asset_library().is_some());
        let cube = list.find_path("props.blend/Object/Cube").unwrap();
        assert!(list.find_path("Material/Wood").is_some());
        list.select_index_set(cube, SelectOp::Add, SelectFlags::SELECTED, SelectCheck::All);
        let cube_uid = list.file(cube).unwrap().uid;

        main.add(MainDataItem::new(IdCode::Material, "Stone").with_asset(AssetMetaData::default()));
        list.tag_force_reset_main_files();
        assert!(list.needs_reading());
        read_blocking(&mut list);

        assert!(list.find_path("Material/Stone").is_some());
        assert!(list.find_path("Material/Wood").is_some());
        let cube = list.find_uid(cube_uid).unwrap();
        assert!(list.is_selected(cube, SelectFlags::SELECTED, SelectCheck::All));
    }

    #[test]
    fn test_main_files_tag_ignored_for_dirs() {
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.flags.remove(ListFlags::FORCE_RESET);
        list.tag_force_reset_main_files();
        assert!(!list.flags().contains(ListFlags::FORCE_RESET_MAIN_FILES));
    }

    #[test]
    fn test_clear_releases_assets() {
        let tmp = TempDir::new().unwrap();
        let main = Arc::new(InMemoryMain::new(Some(tmp.path().join("current.blend"))));
        main.add(MainDataItem::new(IdCode::Material, "Wood").with_asset(AssetMetaData::default()));
        let context = asset_library_context(&tmp, main);

        let mut list = FileList::new(Arc::clone(&context));
        list.settype(ListingMode::AssetLibrary);
        list.setlibrary(Some(AssetLibraryReference::Custom("props".into())));
        read_blocking(&mut list);
        let library = Arc::clone(list.asset_library().unwrap());
        assert!(!library.is_empty());
        assert!(!context.asset_libraries.current_file_library().is_empty());

        list.clear();
        assert!(library.is_empty());
        assert!(context.asset_libraries.current_file_library().is_empty());
        assert!(list.asset_library().is_none());
        assert_eq!(list.files_num_entries(), 0);
    }

    #[test]
    fn test_download_needs_online_asset() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.setdir(tmp.path());
        read_blocking(&mut list);

        assert!(list.request_asset_download(0).is_err());
        assert!(list.request_asset_download(99).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_threaded_read() {
        let tmp = dir_fixture();
        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setdir(tmp.path());

        list.readjob_start();
        assert!(list.is_pending());
        let state = list.readjob_wait().await.unwrap();

        assert_eq!(state, ReadJobState::Finished);
        assert!(list.is_ready());
        assert_eq!(list.readjob_progress(), 1.0);
        assert_eq!(list.files_ensure(), 2);
        assert_eq!(names(&mut list), vec!["a.txt", "b.png"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_drops_entries_of_stopped_read() {
        let first = TempDir::new().unwrap();
        for i in 0..64 {
            let sub = first.path().join(format!("old_dir_{i}"));
            fs::create_dir(&sub).unwrap();
            for j in 0..16 {
                fs::write(sub.join(format!("old_{j}.txt")), b"").unwrap();
            }
        }
        let second = dir_fixture();

        let mut list = FileList::new(Arc::new(ListingContext::default()));
        list.set_filter(&FilterOptions {
            hide_dot: true,
            hide_parent: true,
            ..FilterOptions::default()
        });
        list.setrecursion(2);
        list.setdir(first.path());
        list.readjob_start();

        // Switch roots while the first read is still going.
        list.setdir(second.path());
        list.readjob_start();
        let state = list.readjob_wait().await.unwrap();
        assert_eq!(state, ReadJobState::Finished);

        // Give the stopped job time to hit its next append.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        list.readjob_update();
        list.files_ensure();

        let listed = names(&mut list);
        assert!(listed.iter().all(|name| !name.starts_with("old")), "{listed:?}");
        assert_eq!(listed, vec!["a.txt", "b.png"]);
    }

    #[test]
    fn test_from_config() {
        let tmp = dir_fixture();
        let mut config = Config::default();
        config.listing.root = Some(tmp.path().to_path_buf());
        config.listing.recursion = 9;
        config.listing.hide_parent = true;
        config.listing.sort = SortKey::Size;

        let list = FileList::from_config(Arc::new(ListingContext::default()), &config);
        assert_eq!(list.root(), tmp.path());
        assert_eq!(list.max_recursion(), MAX_RECURSION);
        assert_eq!(list.sorting(), (SortKey::Size, false));
        assert!(list.filter_config().flags.contains(FilterFlags::HIDE_PARENT | FilterFlags::HIDE_DOT));
    }
}
