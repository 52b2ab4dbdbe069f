//! `src/listing/filter.rs`
//! ============================================================================
//! # Filter engine
//!
//! Pure inclusion predicates over [`InternEntry`]. Every function answers
//! "should this entry be in the filtered view", so `true` keeps the entry.
//! Predicates only read the entry and the [`FilterConfig`]; callers may run
//! them concurrently for different entries.

use std::sync::Arc;

use bitflags::bitflags;
use compact_str::CompactString;
use hashbrown::HashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::library::{AssetLibrary, AssetMetaData};
use crate::listing::glob::{GlobFilter, pad_search, strip_search};
use crate::model::entry::{FileAttributes, InternEntry, TypeFlags, is_hidden_dot_filename};
use crate::model::id_code::IdFilter;

/// Below this many entries a filter pass stays on the calling thread.
pub const PARALLEL_FILTER_THRESHOLD: usize = 4096;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FilterFlags: u8 {
        const DO_FILTER    = 1 << 0;
        const HIDE_DOT     = 1 << 1;
        const HIDE_PARENT  = 1 << 2;
        /// Hide library group directories; set per pass, never by the user.
        const HIDE_LIB_DIR = 1 << 3;
        const ASSETS_ONLY  = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CatalogVisibility {
    #[default]
    All,
    /// The catalog and all catalogs nested below it.
    Catalog(Uuid),
    /// Assets with no catalog or a catalog the library does not know.
    Unassigned,
}

/// User-facing filter options, applied with [`FilterConfig::set_options`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub do_filter: bool,
    pub hide_dot: bool,
    pub hide_parent: bool,
    pub assets_only: bool,
    pub filter: TypeFlags,
    pub filter_id: IdFilter,
    pub filter_glob: CompactString,
    pub filter_search: CompactString,
}

/// Catalog sets computed once per filter pass.
#[derive(Debug, Clone, Default)]
struct PreparedCatalogs {
    visible: HashSet<Uuid>,
    known: HashSet<Uuid>,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub flags: FilterFlags,
    pub filter: TypeFlags,
    pub filter_id: IdFilter,
    /// Files matching it are flagged as operator files while reading.
    pub filter_glob: GlobFilter,
    /// Padded with `*` on both ends, or empty.
    pub filter_search: CompactString,
    pub catalog_visibility: CatalogVisibility,
    /// `filter_search`, compiled.
    search: GlobFilter,
    prepared: Option<PreparedCatalogs>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            flags: FilterFlags::HIDE_DOT,
            filter: TypeFlags::empty(),
            filter_id: IdFilter::all(),
            filter_glob: GlobFilter::default(),
            filter_search: CompactString::default(),
            catalog_visibility: CatalogVisibility::All,
            search: GlobFilter::default(),
            prepared: None,
        }
    }
}

impl FilterConfig {
    /// Apply user options. Returns whether anything changed, in which case
    /// the filtered view must be rebuilt.
    pub fn set_options(&mut self, options: &FilterOptions) -> bool {
        let mut update = false;

        for (flag, wanted) in [
            (FilterFlags::DO_FILTER, options.do_filter),
            (FilterFlags::HIDE_DOT, options.hide_dot),
            (FilterFlags::HIDE_PARENT, options.hide_parent),
            (FilterFlags::ASSETS_ONLY, options.assets_only),
        ] {
            if self.flags.contains(flag) != wanted {
                self.flags.toggle(flag);
                update = true;
            }
        }

        if self.filter != options.filter {
            self.filter = options.filter;
            update = true;
        }

        // Data-block type filtering only means something when library
        // contents are part of the type filter.
        let filter_id = if options.filter.contains(TypeFlags::BLENDERLIB) {
            options.filter_id
        } else {
            IdFilter::all()
        };
        if self.filter_id != filter_id {
            self.filter_id = filter_id;
            update = true;
        }

        if self.filter_glob.as_str() != options.filter_glob.as_str() {
            self.filter_glob = GlobFilter::new(&options.filter_glob);
            update = true;
        }

        let search = pad_search(&options.filter_search);
        if self.filter_search != search {
            self.search = GlobFilter::single(&search);
            self.filter_search = search;
            update = true;
        }

        update
    }

    /// Returns whether the visibility changed.
    pub fn set_catalog_visibility(&mut self, visibility: CatalogVisibility) -> bool {
        if self.catalog_visibility == visibility {
            return false;
        }
        self.catalog_visibility = visibility;
        self.prepared = None;
        true
    }

    /// Resolve catalog visibility against the libraries in scope.
    pub fn prepare_catalogs(&mut self, libraries: &[Arc<AssetLibrary>]) {
        let mut prepared = PreparedCatalogs::default();
        for library in libraries {
            let catalogs = library.catalogs();
            prepared.known.extend(catalogs.iter().map(|entry| entry.id));
            if let CatalogVisibility::Catalog(id) = &self.catalog_visibility {
                prepared.visible.extend(catalogs.with_descendants(id));
            }
        }
        self.prepared = Some(prepared);
    }

    /// Set or clear [`FilterFlags::HIDE_LIB_DIR`] for the coming pass: group
    /// directories are hidden in flat (recursive) listings unless the root is
    /// itself a library.
    pub fn update_hide_lib_dir(&mut self, max_recursion: u32, root_is_library: bool) {
        self.flags
            .set(FilterFlags::HIDE_LIB_DIR, max_recursion > 0 && !root_is_library);
    }

    fn catalog_visible(&self, metadata: Option<&AssetMetaData>) -> bool {
        let catalog_id = metadata.and_then(|metadata| metadata.catalog_id);
        match &self.catalog_visibility {
            CatalogVisibility::All => true,
            CatalogVisibility::Catalog(id) => catalog_id.is_some_and(|catalog| {
                self.prepared.as_ref().map_or(catalog == *id, |prepared| {
                    prepared.visible.contains(&catalog)
                })
            }),
            CatalogVisibility::Unassigned => match catalog_id {
                None => true,
                Some(catalog) => self
                    .prepared
                    .as_ref()
                    .is_some_and(|prepared| !prepared.known.contains(&catalog)),
            },
        }
    }
}

// ------------------------------------------------------------
// Base predicates
// ------------------------------------------------------------

/// `true` when the entry is hidden under the current flags.
#[must_use]
pub fn hidden_by_filter(entry: &InternEntry, config: &FilterConfig) -> bool {
    if entry.is_current() {
        return true;
    }

    if config.flags.contains(FilterFlags::HIDE_PARENT) && entry.is_parent() {
        return true;
    }

    if config.flags.contains(FilterFlags::HIDE_DOT)
        && (entry.attributes.contains(FileAttributes::HIDDEN)
            || is_hidden_dot_filename(&entry.relpath))
    {
        return true;
    }

    // Data-blocks (not their group directories) must be assets in assets-only mode.
    !entry.is_dir()
        && entry.is_library_item()
        && config.flags.contains(FilterFlags::ASSETS_ONLY)
        && !entry.typeflag.contains(TypeFlags::ASSET)
}

/// The search pattern applied to the relative path. Applies even when type
/// filtering is off.
#[must_use]
pub fn relpath_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    config.filter_search.is_empty() || config.search.is_match(&entry.relpath)
}

#[must_use]
pub fn name_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    config.filter_search.is_empty() || config.search.is_match(&entry.name)
}

#[must_use]
pub fn file_type_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    if hidden_by_filter(entry, config) {
        return false;
    }

    // `..` stays browsable whatever the type filter says.
    if entry.is_parent() {
        return true;
    }

    if config.filter.is_empty() || !config.flags.contains(FilterFlags::DO_FILTER) {
        return true;
    }

    if entry.is_dir() {
        if entry
            .typeflag
            .intersects(TypeFlags::BLENDERLIB | TypeFlags::BLEND_FILES)
        {
            config.filter.intersects(TypeFlags::BLEND_FILES)
        } else {
            config.filter.contains(TypeFlags::FOLDER)
        }
    } else {
        entry.typeflag.intersects(config.filter)
    }
}

/// Plain directory listing.
#[must_use]
pub fn file_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    file_type_included(entry, config)
        && (relpath_included(entry, config) || name_included(entry, config))
}

/// Type filter plus the data-block type filter for library entries.
#[must_use]
pub fn id_type_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    if !file_type_included(entry, config) {
        return false;
    }

    let filtering = (!config.filter.is_empty() || !config.filter_id.is_empty())
        && config.flags.contains(FilterFlags::DO_FILTER);
    if !filtering {
        return true;
    }

    let Some(id_code) = entry.id_code else {
        return true;
    };

    // Group directories carry a type code but no data-block name.
    if entry.is_dir() && config.flags.contains(FilterFlags::HIDE_LIB_DIR) {
        return false;
    }

    id_code.filter_bit().intersects(config.filter_id)
}

/// Catalog membership plus the free-text search over name and tags.
#[must_use]
pub fn asset_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    let asset = entry.asset();
    let metadata = asset.as_ref().map(|asset| &asset.metadata);

    if !config.catalog_visible(metadata) {
        return false;
    }

    if config.filter_search.is_empty() {
        return true;
    }

    let needle = strip_search(&config.filter_search).to_lowercase();
    if entry.display_name().to_lowercase().contains(&needle) {
        return true;
    }

    metadata.is_some_and(|metadata| {
        metadata
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
    })
}

// ------------------------------------------------------------
// Per-mode compositions
// ------------------------------------------------------------

#[must_use]
pub fn lib_type_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    if entry.is_library_item() {
        id_type_included(entry, config)
    } else {
        file_type_included(entry, config)
    }
}

#[must_use]
pub fn lib_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    lib_type_included(entry, config) && relpath_included(entry, config)
}

#[must_use]
pub fn main_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    !hidden_by_filter(entry, config)
}

#[must_use]
pub fn main_assets_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    id_type_included(entry, config) && asset_included(entry, config)
}

#[must_use]
pub fn asset_library_included(entry: &InternEntry, config: &FilterConfig) -> bool {
    if entry.is_main_data() {
        return main_assets_included(entry, config);
    }
    lib_type_included(entry, config) && asset_included(entry, config)
}

/// Keep the entries `predicate` accepts, preserving order. Large inputs are
/// split across the rayon pool.
pub fn filter_entries<F>(
    entries: &[Arc<InternEntry>],
    config: &FilterConfig,
    predicate: F,
) -> Vec<Arc<InternEntry>>
where
    F: Fn(&InternEntry, &FilterConfig) -> bool + Sync,
{
    if entries.len() < PARALLEL_FILTER_THRESHOLD {
        return entries
            .iter()
            .filter(|entry| predicate(entry, config))
            .cloned()
            .collect();
    }

    entries
        .par_iter()
        .filter(|entry| predicate(entry, config))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::catalog::CatalogEntry;
    use crate::asset::library::AssetHandle;
    use crate::model::id_code::IdCode;

    fn entry(relpath: &str, typeflag: TypeFlags) -> InternEntry {
        let mut entry = InternEntry::new(relpath, typeflag);
        entry.name = relpath.rsplit('/').next().unwrap_or(relpath).into();
        entry
    }

    fn options() -> FilterOptions {
        FilterOptions {
            hide_dot: true,
            filter_id: IdFilter::all(),
            ..FilterOptions::default()
        }
    }

    #[test]
    fn test_hidden_rules() {
        let mut config = FilterConfig::default();
        config.set_options(&options());

        assert!(file_included(&entry("a.txt", TypeFlags::TEXT), &config));
        assert!(hidden_by_filter(&entry(".", TypeFlags::DIR), &config));
        assert!(!hidden_by_filter(&entry("..", TypeFlags::DIR), &config));
        assert!(hidden_by_filter(&entry(".c", TypeFlags::empty()), &config));

        let mut attr_hidden = entry("visible", TypeFlags::empty());
        attr_hidden.attributes = FileAttributes::HIDDEN;
        assert!(hidden_by_filter(&attr_hidden, &config));

        config.set_options(&FilterOptions { hide_parent: true, ..options() });
        assert!(hidden_by_filter(&entry("..", TypeFlags::DIR), &config));

        config.set_options(&FilterOptions { hide_dot: false, ..options() });
        assert!(!hidden_by_filter(&entry(".c", TypeFlags::empty()), &config));
    }

    #[test]
    fn test_parent_follows_hide_parent() {
        let parent = entry("..", TypeFlags::DIR);
        let current = entry(".", TypeFlags::DIR);

        let mut config = FilterConfig::default();
        config.set_options(&options());
        assert!(file_included(&parent, &config));
        assert!(!file_included(&current, &config));

        // A type filter without FOLDER still leaves the way up.
        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::IMAGE,
            ..options()
        });
        assert!(file_included(&parent, &config));

        config.set_options(&FilterOptions { hide_parent: true, ..options() });
        assert!(!file_included(&parent, &config));
        assert!(!file_included(&current, &config));
    }

    #[test]
    fn test_scenario_hide_dot() {
        let mut config = FilterConfig::default();
        config.set_options(&options());

        let kept: Vec<CompactString> = ["a.txt", "b.png", ".c"]
            .iter()
            .map(|name| entry(name, crate::model::entry::extension_type(std::path::Path::new(name))))
            .filter(|entry| file_included(entry, &config))
            .map(|entry| entry.relpath)
            .collect();
        assert_eq!(kept, vec!["a.txt", "b.png"]);
    }

    #[test]
    fn test_type_filter_special_cases_dirs() {
        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::IMAGE,
            ..options()
        });

        assert!(file_type_included(&entry("p.png", TypeFlags::IMAGE), &config));
        assert!(!file_type_included(&entry("t.txt", TypeFlags::TEXT), &config));
        assert!(!file_type_included(&entry("sub", TypeFlags::DIR), &config));
        assert!(!file_type_included(&entry("lib.blend", TypeFlags::DIR | TypeFlags::BLENDER), &config));

        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::IMAGE | TypeFlags::FOLDER,
            ..options()
        });
        assert!(file_type_included(&entry("sub", TypeFlags::DIR), &config));
        assert!(!file_type_included(&entry("lib.blend", TypeFlags::DIR | TypeFlags::BLENDER), &config));

        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::BLENDER,
            ..options()
        });
        assert!(file_type_included(&entry("lib.blend", TypeFlags::DIR | TypeFlags::BLENDER), &config));
    }

    #[test]
    fn test_search_matches_relpath_or_name() {
        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions {
            filter_search: "cube".into(),
            ..options()
        });
        assert_eq!(config.filter_search, "*cube*");

        assert!(file_included(&entry("models/Cube.obj", TypeFlags::OBJECT_IO), &config));
        assert!(!file_included(&entry("models/sphere.obj", TypeFlags::OBJECT_IO), &config));
    }

    #[test]
    fn test_default_options_let_every_id_through() {
        let defaults = FilterOptions::default();
        assert_eq!(defaults.filter_id, IdFilter::empty());

        let mut config = FilterConfig::default();
        config.set_options(&defaults);
        assert_eq!(config.filter_id, IdFilter::all());
    }

    #[test]
    fn test_filter_id_only_with_blenderlib() {
        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::BLENDER,
            filter_id: IdFilter::MESH,
            ..options()
        });
        assert_eq!(config.filter_id, IdFilter::all());

        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::BLENDER | TypeFlags::BLENDERLIB,
            filter_id: IdFilter::MESH,
            ..options()
        });
        assert_eq!(config.filter_id, IdFilter::MESH);

        let mut mesh = entry("lib.blend/Mesh/Cube", TypeFlags::BLENDERLIB);
        mesh.id_code = Some(IdCode::Mesh);
        let mut object = entry("lib.blend/Object/Cube", TypeFlags::BLENDERLIB);
        object.id_code = Some(IdCode::Object);
        assert!(lib_included(&mesh, &config));
        assert!(!lib_included(&object, &config));
    }

    #[test]
    fn test_hide_lib_dir() {
        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions {
            do_filter: true,
            filter: TypeFlags::BLENDER | TypeFlags::BLENDERLIB,
            ..options()
        });
        let mut group = entry("lib.blend/Mesh", TypeFlags::BLENDERLIB | TypeFlags::DIR);
        group.id_code = Some(IdCode::Mesh);

        config.update_hide_lib_dir(0, false);
        assert!(id_type_included(&group, &config));

        config.update_hide_lib_dir(2, false);
        assert!(!id_type_included(&group, &config));

        config.update_hide_lib_dir(2, true);
        assert!(id_type_included(&group, &config));
    }

    #[test]
    fn test_assets_only_hides_plain_datablocks() {
        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions { assets_only: true, ..options() });

        let plain = entry("lib.blend/Object/Cube", TypeFlags::BLENDERLIB);
        let asset = entry("lib.blend/Object/Chair", TypeFlags::BLENDERLIB | TypeFlags::ASSET);
        let group = entry("lib.blend/Object", TypeFlags::BLENDERLIB | TypeFlags::DIR);
        assert!(hidden_by_filter(&plain, &config));
        assert!(!hidden_by_filter(&asset, &config));
        assert!(!hidden_by_filter(&group, &config));
    }

    #[test]
    fn test_asset_search_and_catalogs() {
        let library = Arc::new(AssetLibrary::new("test", None));
        let props = Uuid::from_u128(1);
        let chairs = Uuid::from_u128(2);

        let tagged = library.add_external_asset(
            "a.blend/Object/Stool",
            "Stool",
            Some(IdCode::Object),
            AssetMetaData {
                catalog_id: Some(chairs),
                tags: vec!["Furniture".into()],
                ..AssetMetaData::default()
            },
        );
        let loose = library.add_external_asset("a.blend/Object/Rock", "Rock", Some(IdCode::Object), AssetMetaData::default());

        let mut stool = entry("a.blend/Object/Stool", TypeFlags::BLENDERLIB | TypeFlags::ASSET);
        stool.asset = Some(AssetHandle::new(&tagged));
        let mut rock = entry("a.blend/Object/Rock", TypeFlags::BLENDERLIB | TypeFlags::ASSET);
        rock.asset = Some(AssetHandle::new(&loose));

        let mut config = FilterConfig::default();
        config.set_options(&FilterOptions { filter_search: "furn".into(), ..options() });
        assert!(asset_included(&stool, &config));
        assert!(!asset_included(&rock, &config));

        config.set_options(&options());
        {
            // Catalog definitions are normally read from disk.
            let mut service = crate::asset::catalog::CatalogService::new();
            service.insert(CatalogEntry { id: props, path: "props".into(), simple_name: "props".into() });
            service.insert(CatalogEntry { id: chairs, path: "props/chairs".into(), simple_name: "chairs".into() });
            let scoped = Arc::new(AssetLibrary::new("scoped", None));
            scoped.set_catalogs(service);
            config.set_catalog_visibility(CatalogVisibility::Catalog(props));
            config.prepare_catalogs(&[scoped]);
        }
        assert!(asset_included(&stool, &config));
        assert!(!asset_included(&rock, &config));

        config.set_catalog_visibility(CatalogVisibility::Unassigned);
        config.prepare_catalogs(&[Arc::clone(&library)]);
        assert!(asset_included(&rock, &config));
        // The library itself has no catalog definitions, so `chairs` is unknown.
        assert!(asset_included(&stool, &config));
    }

    #[test]
    fn test_filter_entries_parallel_matches_serial() {
        let mut config = FilterConfig::default();
        config.set_options(&options());

        let entries: Vec<Arc<InternEntry>> = (0..PARALLEL_FILTER_THRESHOLD + 10)
            .map(|i| {
                let name = if i % 3 == 0 { format!(".hidden{i}") } else { format!("file{i}.txt") };
                Arc::new(entry(&name, TypeFlags::TEXT))
            })
            .collect();

        let parallel = filter_entries(&entries, &config, file_included);
        let serial: Vec<_> = entries.iter().filter(|e| file_included(e, &config)).cloned().collect();
        assert_eq!(parallel.len(), serial.len());
        assert!(parallel.iter().zip(&serial).all(|(a, b)| Arc::ptr_eq(a, b)));
    }
}
