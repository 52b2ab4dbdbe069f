//! `src/fs/paths.rs`
//!
//! Path helpers shared by the walkers: library path explosion, relative path
//! joining and directory validation.

use std::path::{Component, Path, PathBuf};

use compact_str::CompactString;

use crate::model::entry::is_blend_path;
use crate::model::id_code::IdCode;

/// `/x/lib.blend/Object/Cube` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPath {
    pub library: PathBuf,
    pub group: Option<IdCode>,
    pub name: Option<CompactString>,
}

/// Split `path` at the deepest existing library file. `None` when no
/// component is a library file, or when the part after it does not start
/// with a known group.
#[must_use]
pub fn explode_library_path(path: &Path) -> Option<LibraryPath> {
    let library = path.ancestors().find(|ancestor| {
        ancestor
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_blend_path)
            && ancestor.is_file()
    })?;

    let rest = path.strip_prefix(library).ok()?;
    let mut parts = rest.components().filter_map(|component| match component {
        Component::Normal(part) => part.to_str(),
        _ => None,
    });

    let group = match parts.next() {
        Some(group) => Some(IdCode::from_group_name(group)?),
        None => None,
    };
    let name: Vec<&str> = parts.collect();
    let name = (!name.is_empty()).then(|| CompactString::from(name.join("/")));

    Some(LibraryPath {
        library: library.to_path_buf(),
        group,
        name,
    })
}

#[must_use]
pub fn is_dir_or_library(path: &Path) -> bool {
    path.is_dir() || explode_library_path(path).is_some()
}

/// Closest ancestor of `path` (itself included) accepted by `valid`.
#[must_use]
pub fn nearest_valid_ancestor(path: &Path, valid: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    path.ancestors()
        .find(|ancestor| !ancestor.as_os_str().is_empty() && valid(ancestor))
        .map(Path::to_path_buf)
}

/// `prefix/name` with `/` separators; a bare `name` for an empty prefix.
#[must_use]
pub fn join_relpath(prefix: &str, name: &str) -> CompactString {
    if prefix.is_empty() {
        CompactString::from(name)
    } else {
        CompactString::from(format!("{}/{name}", prefix.trim_end_matches('/')))
    }
}

/// Relative path of `path` below `root`, `/`-separated.
#[must_use]
pub fn relpath_of(root: &Path, path: &Path) -> Option<CompactString> {
    let rest = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(CompactString::from(parts.join("/")))
}
