//! ``src/operators/dir_walk.rs``
//!
//! # Directory and library walk
//!
//! Iterative walk over a root with an explicit work stack. Each visited
//! directory (or library file, when library browsing is on) becomes one
//! batch appended to the entry store.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use tracing::{debug, warn};

use crate::asset::library::AssetHandle;
use crate::error::CoreResult;
use crate::fs::dir_scanner::{ScanOptions, list_dir};
use crate::fs::paths::{explode_library_path, join_relpath};
use crate::library::indexer::IndexLookup;
use crate::library::reader::DatablockInfo;
use crate::model::entry::{FILENAME_PARENT, FileAttributes, InternEntry, TypeFlags};
use crate::operators::read_job::ReadJobRun;

/// Deepest recursion level the listing offers.
pub const MAX_RECURSION: u32 = 4;

#[derive(Debug)]
struct TodoDir {
    level: u32,
    dir: PathBuf,
    rel_prefix: CompactString,
}

#[derive(Debug, Clone, Copy)]
pub struct LibListOptions {
    /// List each group's data-blocks along with the groups.
    pub recursive: bool,
    /// Add a `..` entry leading out of the library.
    pub add_parent: bool,
}

/// Whether the walk descends into `entry`, found at `level`.
#[must_use]
pub fn should_recurse(max_recursion: u32, is_lib: bool, level: u32, entry: &InternEntry) -> bool {
    if max_recursion == 0 {
        return false;
    }
    if !is_lib && level > max_recursion {
        return false;
    }
    // At the last level only library files are still opened.
    if !is_lib && level >= max_recursion && !entry.typeflag.intersects(TypeFlags::BLEND_FILES) {
        return false;
    }
    // Group contents were already listed with the group.
    if entry.typeflag.contains(TypeFlags::BLENDERLIB) {
        return false;
    }
    if !entry.is_dir() || entry.is_currpar() {
        return false;
    }
    true
}

fn datablock_entry(run: &ReadJobRun<'_>, relpath: CompactString, info: &DatablockInfo) -> InternEntry {
    let mut entry = InternEntry::new(relpath, TypeFlags::BLENDERLIB);
    entry.name = info.name.clone();
    entry.id_code = Some(info.id_code);
    entry.blenderlib_has_no_preview = !info.has_preview;
    if info.name.starts_with('.') {
        entry.attributes |= FileAttributes::HIDDEN;
    }

    if let Some(metadata) = &info.asset {
        entry.typeflag |= TypeFlags::ASSET;
        if let Some(library) = &run.load_asset_library {
            let asset = library.add_external_asset(
                entry.relpath.clone(),
                info.name.clone(),
                Some(info.id_code),
                metadata.clone(),
            );
            entry.asset = Some(AssetHandle::new(&asset));
        }
    }
    entry
}

fn parent_entry(rel_prefix: &str) -> InternEntry {
    let mut entry = InternEntry::new(
        join_relpath(rel_prefix, FILENAME_PARENT),
        TypeFlags::BLENDERLIB | TypeFlags::DIR,
    );
    entry.name = CompactString::const_new(FILENAME_PARENT);
    entry
}

fn datablock_relpath(rel_prefix: &str, info: &DatablockInfo) -> CompactString {
    join_relpath(
        rel_prefix,
        &format!("{}/{}", info.id_code.group_name(), info.name),
    )
}

/// List the contents of a library path (`lib.blend` or `lib.blend/Group`).
///
/// `None` when `dir` is not inside a library file. `Some(Err)` when the
/// library could not be opened.
pub fn list_lib(
    run: &ReadJobRun<'_>,
    dir: &Path,
    rel_prefix: &str,
    options: LibListOptions,
) -> Option<CoreResult<Vec<InternEntry>>> {
    let exploded = explode_library_path(dir)?;
    let assets_only = run.load_asset_library.is_some();
    // The index holds flat listings of whole libraries.
    let use_indexer = exploded.group.is_none() && options.recursive;

    if use_indexer {
        if let IndexLookup::Hit(datablocks) = run.context.indexer.read_index(&exploded.library) {
            let mut entries = Vec::with_capacity(datablocks.len() + 1);
            if options.add_parent {
                entries.push(parent_entry(rel_prefix));
            }
            entries.extend(
                datablocks
                    .iter()
                    .filter(|info| !assets_only || info.asset.is_some())
                    .map(|info| datablock_entry(run, datablock_relpath(rel_prefix, info), info)),
            );
            return Some(Ok(entries));
        }
    }

    if run.is_cancelled() {
        return Some(Ok(Vec::new()));
    }

    let mut handle = match run.context.library_reader.open(&exploded.library) {
        Ok(handle) => handle,
        Err(err) => return Some(Err(err)),
    };

    let mut entries = Vec::new();
    if options.add_parent {
        entries.push(parent_entry(rel_prefix));
    }

    if let Some(group) = exploded.group {
        for info in handle.datablocks(group, assets_only) {
            let relpath = join_relpath(rel_prefix, &info.name);
            entries.push(datablock_entry(run, relpath, &info));
        }
        return Some(Ok(entries));
    }

    let mut indexed = Vec::new();
    for group in handle.linkable_groups() {
        let mut group_entry = InternEntry::new(
            join_relpath(rel_prefix, group.group_name()),
            TypeFlags::BLENDERLIB | TypeFlags::DIR,
        );
        group_entry.id_code = Some(group);
        group_entry.name = CompactString::const_new(group.group_name());
        entries.push(group_entry);

        if options.recursive {
            for info in handle.datablocks(group, assets_only) {
                entries.push(datablock_entry(run, datablock_relpath(rel_prefix, &info), &info));
                indexed.push(info);
            }
        }
    }

    if use_indexer {
        run.context.indexer.update_index(&exploded.library, &indexed);
    }
    Some(Ok(entries))
}

/// Walk `root`, appending one batch per visited directory or library.
/// With `report_progress` unset the caller owns the progress value.
pub fn walk(run: &mut ReadJobRun<'_>, root: &Path, do_lib: bool, report_progress: bool) {
    let settings = run.settings;
    let max_recursion = settings.max_recursion.min(MAX_RECURSION);
    let main_file = run.context.main_data.file_path();

    let mut todo = vec![TodoDir {
        level: 1,
        dir: root.to_path_buf(),
        rel_prefix: CompactString::default(),
    }];
    let mut todo_count = 1_usize;
    let mut done = 0_usize;
    let mut drained = true;

    while let Some(TodoDir { level, dir, rel_prefix }) = todo.pop() {
        if run.is_cancelled() {
            drained = false;
            break;
        }

        let skip_currpar = level > 1;
        let listing = if do_lib {
            list_lib(
                run,
                &dir,
                &rel_prefix,
                LibListOptions {
                    recursive: max_recursion > 0,
                    add_parent: !skip_currpar,
                },
            )
        } else {
            None
        };
        let is_lib = listing.is_some();

        let listing = listing.unwrap_or_else(|| {
            list_dir(
                &dir,
                &rel_prefix,
                &ScanOptions {
                    do_lib,
                    main_file: main_file.as_deref(),
                    filter_glob: Some(&settings.filter_glob),
                    skip_currpar,
                },
            )
        });

        let mut entries = match listing {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    marker = "WALK_DIR_SKIPPED",
                    operation_type = "read_job",
                    path = %dir.display(),
                    error = %err,
                    "Skipping unreadable directory"
                );
                run.reports
                    .warning(format!("Could not list {}: {err}", dir.display()));
                Vec::new()
            }
        };

        for entry in &mut entries {
            entry.uid = run.generate_uid();
            if should_recurse(max_recursion, is_lib, level, entry) {
                todo.push(TodoDir {
                    level: level + 1,
                    dir: root.join(entry.relpath.as_str()),
                    rel_prefix: entry.relpath.clone(),
                });
                todo_count += 1;
            }
        }

        // A cancelled batch is dropped, earlier ones stay.
        if run.is_cancelled() {
            drained = false;
            break;
        }

        run.append(entries);
        done += 1;
        if report_progress {
            #[expect(clippy::cast_precision_loss, reason = "Progress is approximate")]
            run.set_progress(done as f32 / todo_count as f32);
        }
    }

    debug!(
        marker = "WALK_DONE",
        operation_type = "read_job",
        root = %root.display(),
        visited = done,
        discovered = todo_count,
        drained = drained,
        "Walk ended"
    );

    if drained {
        run.context.indexer.finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::library::{AssetLibrary, AssetMetaData};
    use crate::cache::index_cache::MemoryIndexer;
    use crate::context::ListingContext;
    use crate::library::reader::MemoryLibraryReader;
    use crate::listing::mode::ListingMode;
    use crate::model::entry_store::EntryStore;
    use crate::model::id_code::IdCode;
    use crate::operators::read_job::{ReadJobSettings, ReadJobShared};
    use crate::report::ReportList;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn relpaths(store: &EntryStore) -> Vec<String> {
        let mut paths: Vec<String> = store.snapshot().iter().map(|entry| entry.relpath.to_string()).collect();
        paths.sort();
        paths
    }

    fn library_fixture(tmp: &TempDir) -> (Arc<MemoryLibraryReader>, PathBuf) {
        let lib = tmp.path().join("props.blend");
        fs::write(&lib, b"").unwrap();
        let reader = Arc::new(MemoryLibraryReader::new());
        reader.insert(
            lib.clone(),
            [
                DatablockInfo::new(IdCode::Object, "Cube")
                    .with_asset(AssetMetaData::default())
                    .with_preview(),
                DatablockInfo::new(IdCode::Object, ".Hidden"),
                DatablockInfo::new(IdCode::Material, "Wood"),
            ],
        );
        (reader, lib)
    }

    #[test]
    fn test_should_recurse_rules() {
        let dir = InternEntry::new("sub", TypeFlags::DIR);
        let lib = InternEntry::new("lib.blend", TypeFlags::BLENDER | TypeFlags::DIR);
        let group = InternEntry::new("lib.blend/Object", TypeFlags::BLENDERLIB | TypeFlags::DIR);
        let parent = InternEntry::new("..", TypeFlags::DIR);
        let file = InternEntry::new("a.txt", TypeFlags::TEXT);

        assert!(!should_recurse(0, false, 1, &dir));
        assert!(should_recurse(2, false, 1, &dir));
        // Only library files are entered at the last level.
        assert!(!should_recurse(1, false, 1, &dir));
        assert!(should_recurse(1, false, 1, &lib));
        assert!(!should_recurse(1, false, 2, &lib));
        assert!(!should_recurse(3, true, 1, &group));
        assert!(!should_recurse(3, false, 1, &parent));
        assert!(!should_recurse(3, false, 1, &file));
    }

    #[test]
    fn test_recursive_dir_walk() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub/deeper")).unwrap();
        fs::write(tmp.path().join("sub/inner.txt"), b"").unwrap();
        fs::write(tmp.path().join("sub/deeper/deep.txt"), b"").unwrap();
        fs::write(tmp.path().join("top.txt"), b"").unwrap();

        let mut settings = ReadJobSettings::new(tmp.path(), ListingMode::Dir);
        settings.max_recursion = 2;
        let context = ListingContext::default();
        let store = EntryStore::new();
        let reports = ReportList::new();
        let shared = ReadJobShared::new(None);
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);

        walk(&mut run, tmp.path(), false, true);

        assert_eq!(
            relpaths(&store),
            vec![".", "..", "sub", "sub/deeper", "sub/inner.txt", "top.txt"]
        );
        assert_eq!(shared.progress(), 1.0);
        assert!(reports.is_empty());
    }

    #[test]
    fn test_library_walk_uses_index() {
        let tmp = TempDir::new().unwrap();
        let (reader, lib) = library_fixture(&tmp);
        let indexer = Arc::new(MemoryIndexer::default());
        let context = ListingContext::default()
            .with_library_reader(reader.clone())
            .with_indexer(indexer.clone());

        let mut settings = ReadJobSettings::new(tmp.path(), ListingMode::Library);
        settings.max_recursion = 1;
        let reports = ReportList::new();

        let store = EntryStore::new();
        let shared = ReadJobShared::new(None);
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);
        walk(&mut run, tmp.path(), true, true);

        assert_eq!(
            relpaths(&store),
            vec![
                ".",
                "..",
                "props.blend",
                "props.blend/Material",
                "props.blend/Material/Wood",
                "props.blend/Object",
                "props.blend/Object/.Hidden",
                "props.blend/Object/Cube",
            ]
        );
        let snapshot = store.snapshot();
        let cube = snapshot.iter().find(|e| e.relpath == "props.blend/Object/Cube").unwrap();
        assert!(cube.typeflag.contains(TypeFlags::BLENDERLIB | TypeFlags::ASSET));
        assert!(!cube.blenderlib_has_no_preview);
        let hidden = snapshot.iter().find(|e| e.name == ".Hidden").unwrap();
        assert!(hidden.attributes.contains(FileAttributes::HIDDEN));
        assert_eq!(reader.open_count(), 1);

        // Second walk is served from the index.
        let store = EntryStore::new();
        let shared = ReadJobShared::new(None);
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);
        walk(&mut run, tmp.path(), true, true);
        assert_eq!(reader.open_count(), 1);
        assert!(relpaths(&store).contains(&"props.blend/Object/Cube".to_string()));
        assert!(indexer.stats().hits >= 1);
        assert_eq!(indexer.stats().finished_walks, 2);
        assert!(lib.exists());
    }

    #[test]
    fn test_library_group_listing_registers_assets() {
        let tmp = TempDir::new().unwrap();
        let (reader, lib) = library_fixture(&tmp);
        let context = ListingContext::default().with_library_reader(reader);
        let root = lib.join("Object");
        let settings = ReadJobSettings::new(&root, ListingMode::Library);
        let reports = ReportList::new();
        let store = EntryStore::new();
        let library = Arc::new(AssetLibrary::new("props", Some(tmp.path().to_path_buf())));
        let shared = ReadJobShared::new(Some(Arc::clone(&library)));
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);

        walk(&mut run, &root, true, true);

        // Assets only, plus the way out.
        assert_eq!(relpaths(&store), vec!["..", "Cube"]);
        assert_eq!(library.len(), 1);
        let cube = store.snapshot().into_iter().find(|e| e.relpath == "Cube").unwrap();
        assert_eq!(cube.asset().unwrap().name, "Cube");
    }

    #[test]
    fn test_unreadable_library_is_reported() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.blend"), b"").unwrap();
        let mut settings = ReadJobSettings::new(tmp.path(), ListingMode::Library);
        settings.max_recursion = 1;
        let context = ListingContext::default();
        let store = EntryStore::new();
        let reports = ReportList::new();
        let shared = ReadJobShared::new(None);
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);

        walk(&mut run, tmp.path(), true, true);

        assert_eq!(relpaths(&store), vec![".", "..", "broken.blend"]);
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_cancelled_walk_appends_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"").unwrap();
        let indexer = Arc::new(MemoryIndexer::default());
        let context = ListingContext::default().with_indexer(indexer.clone());
        let settings = ReadJobSettings::new(tmp.path(), ListingMode::Dir);
        let store = EntryStore::new();
        let reports = ReportList::new();
        let shared = ReadJobShared::new(None);
        shared.cancel.cancel();
        let mut run = ReadJobRun::new(&settings, &context, &store, &reports, &shared);

        walk(&mut run, tmp.path(), false, true);

        assert!(store.is_empty());
        assert_eq!(indexer.stats().finished_walks, 0);
    }
}
