//! ``src/operators/asset_walk.rs``
//!
//! # Asset listings
//!
//! Readers for the three asset modes: assets of the open file, one asset
//! library (on disk or remote) and all configured libraries at once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use tracing::{debug, info, warn};

use crate::asset::library::{AssetHandle, AssetLibrary, AssetLibraryReference};
use crate::model::entry::{InternEntry, LocalData, TypeFlags};
use crate::operators::dir_walk;
use crate::operators::read_job::ReadJobRun;
use crate::remote::pages::{PageScanner, RemoteAssetRecord, read_page};
use crate::remote::status::RemoteStatus;

// ------------------------------------------------------------
// Main (open file) assets
// ------------------------------------------------------------

/// Re-list the open file's assets into `library`, dropping the previous
/// local assets first.
pub fn main_assets_add_items(run: &ReadJobRun<'_>, library: &AssetLibrary) {
    library.remove_all_local();

    let items = run.context.main_data.asset_items();
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Some(metadata) = item.asset else {
            continue;
        };

        let mut entry = InternEntry::new(
            format!("{}/{}", item.id_code.group_name(), item.name),
            TypeFlags::BLENDERLIB | TypeFlags::ASSET,
        );
        entry.uid = run.generate_uid();
        entry.id_code = Some(item.id_code);
        entry.name.clone_from(&item.name);
        entry.name_is_owned = false;
        entry.blenderlib_has_no_preview = item.preview.is_none();

        let asset = library.add_local_id_asset(item.id_code, item.name.clone(), metadata);
        entry.asset = Some(AssetHandle::new(&asset));
        entry.local_data = Some(LocalData {
            id_code: item.id_code,
            name: item.name,
            preview: item.preview,
        });
        entries.push(entry);
    }

    if run.is_cancelled() {
        return;
    }
    let count = entries.len();
    run.append(entries);
    debug!(
        marker = "MAIN_ASSETS_LISTED",
        operation_type = "asset_walk",
        count = count,
        "Listed assets of the open file"
    );
}

pub fn read_main_assets(run: &mut ReadJobRun<'_>) {
    let library = run.context.asset_libraries.current_file_library();
    main_assets_add_items(run, &library);
    run.load_asset_library = Some(library);
}

// ------------------------------------------------------------
// One asset library
// ------------------------------------------------------------

fn load_library(run: &ReadJobRun<'_>, reference: &AssetLibraryReference) -> Option<Arc<AssetLibrary>> {
    if !run.settings.reload_asset_library {
        if let Some(library) = &run.load_asset_library {
            return Some(Arc::clone(library));
        }
    }

    let library = match run.context.asset_libraries.load(reference) {
        Ok(library) => library,
        Err(err) => {
            run.reports
                .error(format!("Could not load asset library {reference:?}: {err}"));
            return None;
        }
    };

    if run.settings.reload_asset_library {
        library.remove_all_external();
        if let Err(err) = library.reload_catalogs() {
            run.reports
                .warning(format!("Could not reload catalogs of {}: {err}", library.name()));
        }
    }
    Some(library)
}

pub fn read_asset_library(run: &mut ReadJobRun<'_>) {
    let Some(reference) = run.settings.asset_library.clone() else {
        run.reports.error("No asset library selected");
        return;
    };
    if reference == AssetLibraryReference::All {
        read_all_asset_libraries(run);
        return;
    }

    let Some(library) = load_library(run, &reference) else {
        return;
    };
    run.load_asset_library = Some(Arc::clone(&library));

    let main_file = run.context.main_data.file_path();
    let read_main = reference == AssetLibraryReference::CurrentFile
        || main_file.is_some_and(|path| library.contains_path(&path));
    if read_main {
        let current = run.context.asset_libraries.current_file_library();
        main_assets_add_items(run, &current);
    }

    if run.settings.only_main_data || reference == AssetLibraryReference::CurrentFile {
        return;
    }

    match library.remote_url() {
        Some(url) => {
            let url = CompactString::from(url);
            remote_walk(run, &library, &url);
        }
        None => {
            let root = run.settings.root.clone();
            dir_walk::walk(run, &root, true, true);
        }
    }
}

// ------------------------------------------------------------
// All asset libraries
// ------------------------------------------------------------

pub fn read_all_asset_libraries(run: &mut ReadJobRun<'_>) {
    let registry = Arc::clone(&run.context.asset_libraries);
    let current = match registry.load(&AssetLibraryReference::All) {
        Ok(library) => library,
        Err(err) => {
            run.reports.error(format!("Could not load asset libraries: {err}"));
            return;
        }
    };
    main_assets_add_items(run, &current);
    run.load_asset_library = Some(Arc::clone(&current));

    if run.settings.only_main_data {
        return;
    }

    let libraries: Vec<Arc<AssetLibrary>> = registry
        .all_libraries()
        .into_iter()
        .filter(|library| library.root_path().is_some())
        .collect();
    let count = libraries.len();

    for (done, library) in libraries.iter().enumerate() {
        if run.is_cancelled() {
            break;
        }
        let Some(root) = library.root_path().map(Path::to_path_buf) else {
            continue;
        };

        // Entries register with the library they were found in.
        run.load_asset_library = Some(Arc::clone(library));
        match library.remote_url() {
            Some(url) => {
                let url = CompactString::from(url);
                remote_walk(run, library, &url);
            }
            None => dir_walk::walk(run, &root, true, false),
        }

        #[expect(clippy::cast_precision_loss, reason = "Progress is approximate")]
        run.set_progress((done + 1) as f32 / count as f32);
    }
    run.load_asset_library = Some(current);
}

// ------------------------------------------------------------
// Remote libraries
// ------------------------------------------------------------

fn record_entry(run: &ReadJobRun<'_>, library: &AssetLibrary, root: &Path, record: RemoteAssetRecord) -> InternEntry {
    let relpath = record.relpath();
    let mut entry = InternEntry::new(
        relpath.clone(),
        TypeFlags::BLENDERLIB | TypeFlags::ASSET | TypeFlags::ASSET_ONLINE,
    );
    let local = root.join(record.file.as_str()).exists();
    if local {
        entry.typeflag.remove(TypeFlags::ASSET_ONLINE);
    }
    entry.uid = run.generate_uid();
    entry.id_code = Some(record.id_type);
    entry.name.clone_from(&record.name);
    entry.blenderlib_has_no_preview = !local;

    let asset = library.add_external_asset(relpath, record.name.clone(), Some(record.id_type), record.metadata());
    entry.asset = Some(AssetHandle::new(&asset));
    entry
}

/// Read pages that appeared since the last scan; one batch per page.
fn scan_new_pages(run: &ReadJobRun<'_>, library: &AssetLibrary, root: &Path, scanner: &mut PageScanner) {
    let pages = match scanner.new_pages(root) {
        Ok(pages) => pages,
        Err(err) => {
            run.reports
                .warning(format!("Could not read remote metadata in {}: {err}", root.display()));
            return;
        }
    };

    for page_path in pages {
        if run.is_cancelled() {
            return;
        }
        let page = match read_page(&page_path) {
            Ok(page) => page,
            Err(err) => {
                run.reports.warning(format!("Skipping asset page: {err}"));
                continue;
            }
        };
        let entries: Vec<InternEntry> = page
            .assets
            .into_iter()
            .map(|record| record_entry(run, library, root, record))
            .collect();
        run.append(entries);
    }
}

/// Follow a remote library while its downloader syncs metadata pages.
/// Polls the status tracker with backoff until a terminal status or
/// cancellation; cancelling the listing leaves the download alone.
pub fn remote_walk(run: &ReadJobRun<'_>, library: &AssetLibrary, url: &str) {
    let Some(root) = library.root_path() else {
        run.reports
            .error(format!("Remote asset library {} has no local path", library.name()));
        return;
    };
    let tracker = &run.context.remote_status;
    let poll = &run.settings.remote;

    if !tracker.is_loading(url) {
        if let Err(err) = tracker.begin_loading(url, poll.timeout) {
            run.reports.core_error(&err);
            return;
        }
        if let Err(err) = run.context.downloader.request_library_sync(url, root) {
            tracker.set_failure(url, &err.to_string());
            run.reports
                .warning(format!("Could not sync remote asset library {url}: {err}"));
            return;
        }
        info!(
            marker = "REMOTE_SYNC_REQUESTED",
            operation_type = "asset_walk",
            url = url,
            path = %root.display(),
            "Requested remote library sync"
        );
    }

    let mut scanner = PageScanner::new();
    let mut last_new_pages_at: Option<Duration> = None;
    let mut interval = poll.poll_interval_min;

    loop {
        if run.is_cancelled() {
            break;
        }
        tracker.handle_timeout(url);
        let Some(status) = tracker.get(url) else {
            break;
        };
        let terminal = status.status.is_terminal();

        if status.metafiles_in_place && (terminal || status.last_new_pages_at != last_new_pages_at) {
            last_new_pages_at = status.last_new_pages_at;
            scan_new_pages(run, library, root, &mut scanner);
            interval = poll.poll_interval_min;
        }

        if terminal {
            if status.status == RemoteStatus::Failure {
                let message = status.failure_message.unwrap_or_default();
                warn!(
                    marker = "REMOTE_WALK_FAILED",
                    operation_type = "asset_walk",
                    url = url,
                    reason = %message,
                    "Remote library failed"
                );
                run.reports
                    .warning(format!("Remote asset library {url} failed: {message}"));
            }
            break;
        }

        if !run.sleep_cancellable(interval) {
            break;
        }
        interval = (interval * 2).min(poll.poll_interval_max.max(poll.poll_interval_min));
    }
}
