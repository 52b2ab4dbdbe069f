//! ``src/fs/dir_scanner.rs``
//!
//! # `Directory Scanner`: one directory level into listing entries
//!
//! Reads the direct children of a directory with `walkdir`, classifies each
//! one and returns [`InternEntry`]s without UIDs. The read job assigns UIDs
//! and decides what to descend into.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::fs::paths::join_relpath;
use crate::listing::glob::GlobFilter;
use crate::model::entry::{
    EntryStat, FILENAME_CURRENT, FILENAME_PARENT, FileAttributes, InternEntry, TypeFlags,
    extension_type, is_blend_path, is_hidden_dot_filename,
};

/// Per-call options of [`list_dir`].
#[derive(Debug, Clone, Default)]
pub struct ScanOptions<'a> {
    /// Treat library files as browsable directories.
    pub do_lib: bool,
    /// The currently open file; never promoted to a directory.
    pub main_file: Option<&'a Path>,
    /// Files matching this glob list get [`TypeFlags::OPERATOR`].
    pub filter_glob: Option<&'a GlobFilter>,
    /// Leave out `.` and `..`.
    pub skip_currpar: bool,
}

fn stat_of(metadata: &Metadata) -> EntryStat {
    EntryStat::new(metadata.len(), metadata.modified().ok())
}

fn attributes_of(metadata: &Metadata) -> FileAttributes {
    let mut attributes = FileAttributes::empty();
    if metadata.permissions().readonly() {
        attributes |= FileAttributes::READONLY;
    }
    attributes
}

fn currpar_entry(dir: &Path, rel_prefix: &str, name: &str) -> InternEntry {
    let mut entry = InternEntry::new(join_relpath(rel_prefix, name), TypeFlags::DIR);
    entry.name = entry.relpath.clone();
    if let Ok(metadata) = fs::metadata(dir) {
        entry.stat = stat_of(&metadata);
        entry.attributes = attributes_of(&metadata);
    }
    entry
}

/// Classify a non-directory: library files, extension type and the
/// operator glob.
fn file_typeflag(target: &Path, options: &ScanOptions<'_>) -> TypeFlags {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();

    if options.do_lib && is_blend_path(&name) {
        let is_main = options.main_file.is_some_and(|main| main == target);
        return if is_main {
            TypeFlags::BLENDER
        } else {
            TypeFlags::BLENDER | TypeFlags::DIR
        };
    }

    let mut typeflag = extension_type(target);
    if options.filter_glob.is_some_and(|globs| globs.is_match(&name)) {
        typeflag |= TypeFlags::OPERATOR;
    }
    typeflag
}

/// List the direct children of `dir`. Relative paths are `rel_prefix/name`.
///
/// An unreadable `dir` is an error; children that vanish or cannot be
/// stat'ed while listing are skipped.
pub fn list_dir(dir: &Path, rel_prefix: &str, options: &ScanOptions<'_>) -> CoreResult<Vec<InternEntry>> {
    let start = Instant::now();
    if !dir.is_dir() {
        return Err(CoreError::not_a_directory(&dir.to_string_lossy()));
    }

    let mut entries = Vec::new();
    if !options.skip_currpar {
        entries.push(currpar_entry(dir, rel_prefix, FILENAME_CURRENT));
        entries.push(currpar_entry(dir, rel_prefix, FILENAME_PARENT));
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for item in walker {
        let dir_entry = match item {
            Ok(dir_entry) => dir_entry,
            // The directory itself could not be read.
            Err(err) if err.depth() == 0 => return Err(std::io::Error::from(err).into()),
            Err(err) => {
                debug!(
                    marker = "DIR_ENTRY_SKIPPED",
                    operation_type = "dir_scan",
                    error = %err,
                    "Skipping unreadable entry"
                );
                continue;
            }
        };

        let file_name = dir_entry.file_name().to_string_lossy();
        let relpath = join_relpath(rel_prefix, &file_name);
        let path = dir_entry.path();

        let Ok(link_metadata) = dir_entry.metadata() else {
            continue;
        };

        let mut entry = InternEntry::new(relpath, TypeFlags::empty());
        entry.attributes = attributes_of(&link_metadata);
        entry.stat = stat_of(&link_metadata);

        if dir_entry.path_is_symlink() {
            entry.attributes |= FileAttributes::ALIAS | FileAttributes::SYMLINK;
            match fs::canonicalize(path).and_then(|target| fs::metadata(&target).map(|m| (target, m))) {
                Ok((target, metadata)) => {
                    entry.stat = stat_of(&metadata);
                    entry.typeflag = if metadata.is_dir() {
                        TypeFlags::DIR
                    } else {
                        file_typeflag(&target, options)
                    };
                    entry.redirection_path = Some(target);
                }
                // Broken link: keep it but out of sight.
                Err(_) => entry.attributes |= FileAttributes::HIDDEN,
            }
        } else if link_metadata.is_dir() {
            entry.typeflag = TypeFlags::DIR;
        } else {
            entry.typeflag = file_typeflag(path, options);
        }

        if is_hidden_dot_filename(&entry.relpath) {
            entry.attributes |= FileAttributes::HIDDEN;
        }

        entry.name = if entry.is_dir() {
            entry.relpath.clone()
        } else {
            file_name.as_ref().into()
        };
        entries.push(entry);
    }

    info!(
        marker = "PERF_DIRECTORY_SCAN",
        operation_type = "dir_scan",
        path = %dir.display(),
        entries = entries.len(),
        duration_us = start.elapsed().as_micros() as u64,
        "Directory listed"
    );
    Ok(entries)
}

/// Absolute path the entry points at on disk.
#[must_use]
pub fn entry_target(root: &Path, entry: &InternEntry) -> PathBuf {
    entry
        .redirection_path
        .clone()
        .unwrap_or_else(|| root.join(entry.relpath.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(entries: &[InternEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.relpath.as_str()).collect()
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        fs::write(tmp.path().join("b.png"), b"").unwrap();
        fs::write(tmp.path().join(".c"), b"").unwrap();
        fs::write(tmp.path().join("scene.blend"), b"").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        tmp
    }

    #[test]
    fn test_list_dir_classifies_entries() {
        let tmp = fixture();
        let entries = list_dir(tmp.path(), "", &ScanOptions::default()).unwrap();

        assert_eq!(names(&entries), vec![".", "..", ".c", "a.txt", "b.png", "scene.blend", "sub"]);

        let by_name = |name: &str| entries.iter().find(|entry| entry.relpath == name).unwrap();
        assert!(by_name(".").is_dir());
        assert!(by_name(".c").attributes.contains(FileAttributes::HIDDEN));
        assert_eq!(by_name("a.txt").typeflag, TypeFlags::TEXT);
        assert_eq!(by_name("a.txt").stat.size, 5);
        assert_eq!(by_name("b.png").typeflag, TypeFlags::IMAGE);
        // Without library browsing a blend file stays a plain file.
        assert_eq!(by_name("scene.blend").typeflag, TypeFlags::BLENDER);
        assert_eq!(by_name("sub").typeflag, TypeFlags::DIR);
        assert!(entries.iter().all(|entry| entry.uid == 0));
    }

    #[test]
    fn test_list_dir_library_and_operator_flags() {
        let tmp = fixture();
        let main_file = tmp.path().join("scene.blend");
        fs::write(tmp.path().join("other.blend"), b"").unwrap();

        let operators = GlobFilter::new("*.txt");
        let options = ScanOptions {
            do_lib: true,
            main_file: Some(&main_file),
            filter_glob: Some(&operators),
            skip_currpar: true,
        };
        let entries = list_dir(tmp.path(), "nested", &options).unwrap();
        let by_name = |name: &str| entries.iter().find(|entry| entry.relpath == name).unwrap();

        assert!(!entries.iter().any(|entry| entry.is_currpar()));
        assert_eq!(by_name("nested/other.blend").typeflag, TypeFlags::BLENDER | TypeFlags::DIR);
        assert_eq!(by_name("nested/scene.blend").typeflag, TypeFlags::BLENDER);
        assert_eq!(by_name("nested/a.txt").typeflag, TypeFlags::TEXT | TypeFlags::OPERATOR);
        assert_eq!(by_name("nested/a.txt").name, "a.txt");
        // Directories are named by their relative path.
        assert_eq!(by_name("nested/sub").name, "nested/sub");
    }

    #[cfg(unix)]
    #[test]
    fn test_list_dir_symlinks() {
        let tmp = fixture();
        std::os::unix::fs::symlink(tmp.path().join("sub"), tmp.path().join("link_dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("broken")).unwrap();

        let options = ScanOptions {
            skip_currpar: true,
            ..ScanOptions::default()
        };
        let entries = list_dir(tmp.path(), "", &options).unwrap();
        let by_name = |name: &str| entries.iter().find(|entry| entry.relpath == name).unwrap();

        let link = by_name("link_dir");
        assert!(link.is_dir());
        assert!(link.redirection_path.is_some());
        assert!(by_name("broken").attributes.contains(FileAttributes::HIDDEN));
    }

    #[test]
    fn test_list_dir_rejects_files() {
        let tmp = fixture();
        assert!(list_dir(&tmp.path().join("a.txt"), "", &ScanOptions::default()).is_err());
        assert!(list_dir(&tmp.path().join("missing"), "", &ScanOptions::default()).is_err());
    }
}
