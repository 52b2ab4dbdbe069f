//! `src/model/entry.rs`
//! ============================================================
//! Raw listing entries as discovered by the read job.
//!
//! Goals
//! -----
//! • One `InternEntry` per discovered path or in-library data-block.
//! • Identity is the `uid`; array position means nothing.
//! • Asset data is referenced weakly and may vanish at any time.

// ------------------------------------------------------------
// Standard-library imports
// ------------------------------------------------------------

// Paths for redirection targets.
use std::path::{Path, PathBuf};

// Shared ownership of resolved assets.
use std::sync::Arc;

// Modification timestamps.
use std::time::{SystemTime, UNIX_EPOCH};

// ------------------------------------------------------------
// Third-party crate imports
// ------------------------------------------------------------

// Flag sets for entry typing.
use bitflags::bitflags;

// Byte-size formatting utility.
use bytesize::ByteSize;

// Chrono for timestamp formatting.
use chrono::{DateTime, Local};

// CompactString for small-string optimisation.
use compact_str::CompactString;

// Serde traits for (de)serialization of flag sets.
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Local-crate imports
// ------------------------------------------------------------

use crate::asset::library::{AssetHandle, AssetRepresentation};
use crate::model::id_code::IdCode;
use crate::preview::thumbnail::PreviewImage;

/// Process-unique entry identifier; `0` is never issued.
pub type Uid = u32;

pub const FILENAME_CURRENT: &str = ".";
pub const FILENAME_PARENT: &str = "..";

bitflags! {
    /// Entry type bits. `extension_type` only ever yields one of the file
    /// kinds; `DIR`, `BLENDERLIB`, `ASSET`, `ASSET_ONLINE` and `OPERATOR` are
    /// added on top by the scanner.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TypeFlags: u32 {
        /// Filter-only bit standing for plain directories.
        const FOLDER         = 1 << 0;
        const BLENDER        = 1 << 2;
        const IMAGE          = 1 << 4;
        const MOVIE          = 1 << 5;
        const PYSCRIPT       = 1 << 6;
        const FTFONT         = 1 << 7;
        const SOUND          = 1 << 8;
        const TEXT           = 1 << 9;
        const ARCHIVE        = 1 << 10;
        const BTX            = 1 << 11;
        const OPERATOR       = 1 << 12;
        const BLENDER_BACKUP = 1 << 15;
        const ALEMBIC        = 1 << 16;
        const OBJECT_IO      = 1 << 17;
        const USD            = 1 << 18;
        const VOLUME         = 1 << 19;
        const ASSET_ONLINE   = 1 << 27;
        const ASSET          = 1 << 28;
        const DIR            = 1 << 30;
        const BLENDERLIB     = 1 << 31;

        const BLEND_FILES = Self::BLENDER.bits() | Self::BLENDER_BACKUP.bits();
        const PREVIEWABLE = Self::IMAGE.bits()
            | Self::MOVIE.bits()
            | Self::FTFONT.bits()
            | Self::OBJECT_IO.bits()
            | Self::BLENDER.bits()
            | Self::BLENDER_BACKUP.bits()
            | Self::BLENDERLIB.bits();
    }
}

bitflags! {
    /// Raw file attributes as reported by the platform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READONLY  = 1 << 0;
        const HIDDEN    = 1 << 1;
        const SYSTEM    = 1 << 2;
        const TEMPORARY = 1 << 3;
        const OFFLINE   = 1 << 4;
        const ALIAS     = 1 << 5;
        const SYMLINK   = 1 << 6;
    }
}

// ------------------------------------------------------------
// EntryStat: size and modification time.
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStat {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl EntryStat {
    #[must_use]
    pub const fn new(size: u64, mtime: Option<SystemTime>) -> Self {
        Self { size, mtime }
    }

    /// Seconds since the epoch, negative before it, 0 when unknown.
    #[expect(clippy::cast_possible_wrap, reason = "Timestamps fit in i64 seconds")]
    #[must_use]
    pub fn mtime_secs(&self) -> i64 {
        match self.mtime {
            Some(time) => match time.duration_since(UNIX_EPOCH) {
                Ok(after) => after.as_secs() as i64,
                Err(before) => -(before.duration().as_secs() as i64),
            },
            None => 0,
        }
    }
}

// ------------------------------------------------------------
// LocalData: marks entries that mirror in-memory data-blocks.
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalData {
    pub id_code: IdCode,
    pub name: CompactString,
    pub preview: Option<PreviewImage>,
}

// ------------------------------------------------------------
// InternEntry: one discovered item.
// ------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InternEntry {
    pub uid: Uid,

    /// Relative to the listing root; may continue inside a library file.
    pub relpath: CompactString,

    /// Name resolved at scan time. See [`Self::display_name`].
    pub name: CompactString,

    /// False when `name` is borrowed from in-memory data rather than derived.
    pub name_is_owned: bool,

    pub typeflag: TypeFlags,
    pub attributes: FileAttributes,
    pub stat: EntryStat,

    /// Target of an alias/symlink; classify and preview this instead.
    pub redirection_path: Option<PathBuf>,

    pub id_code: Option<IdCode>,
    pub asset: Option<AssetHandle>,
    pub local_data: Option<LocalData>,
    pub blenderlib_has_no_preview: bool,
}

impl InternEntry {
    #[must_use]
    pub fn new(relpath: impl Into<CompactString>, typeflag: TypeFlags) -> Self {
        Self {
            relpath: relpath.into(),
            typeflag,
            name_is_owned: true,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.typeflag.contains(TypeFlags::DIR)
    }

    #[inline]
    #[must_use]
    pub const fn is_library_item(&self) -> bool {
        self.typeflag.contains(TypeFlags::BLENDERLIB)
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        is_current_name(&self.relpath)
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        is_parent_name(&self.relpath)
    }

    #[must_use]
    pub fn is_currpar(&self) -> bool {
        self.is_current() || self.is_parent()
    }

    /// Entry mirrors in-memory (main database) data rather than a file.
    #[inline]
    #[must_use]
    pub const fn is_main_data(&self) -> bool {
        self.local_data.is_some()
    }

    /// Resolve the weak asset reference; `None` once the asset is gone.
    #[must_use]
    pub fn asset(&self) -> Option<Arc<AssetRepresentation>> {
        self.asset.as_ref().and_then(AssetHandle::resolve)
    }

    /// Live asset name when the asset still exists, scan-time name otherwise.
    #[must_use]
    pub fn display_name(&self) -> CompactString {
        self.asset()
            .map_or_else(|| self.name.clone(), |asset| asset.name.clone())
    }

    #[must_use]
    pub fn size_human(&self) -> String {
        ByteSize::b(self.stat.size).to_string()
    }

    #[must_use]
    pub fn format_date(&self, fmt: &str) -> String {
        self.stat.mtime.map_or_else(String::new, |time| {
            let datetime: DateTime<Local> = time.into();
            datetime.format(fmt).to_string()
        })
    }
}

#[must_use]
pub fn is_current_name(name: &str) -> bool {
    name == FILENAME_CURRENT
}

#[must_use]
pub fn is_parent_name(name: &str) -> bool {
    name == FILENAME_PARENT
}

/// Dot-files, backup files (`name~`) and anything below such a component.
#[must_use]
pub fn is_hidden_dot_filename(relpath: &str) -> bool {
    relpath
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .any(|part| {
            let dotted = part.len() > 1 && part.starts_with('.') && !part[1..].starts_with('.');
            dotted || part.ends_with('~')
        })
}

// ------------------------------------------------------------
// Extension typing
// ------------------------------------------------------------

const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".glsl", ".osl", ".data", ".pov", ".ini", ".mcr", ".inc", ".fountain",
];
const FONT_EXTENSIONS: &[&str] = &[".ttf", ".pfb", ".otf", ".woff", ".woff2"];
const USD_EXTENSIONS: &[&str] = &[".usd", ".usda", ".usdc", ".usdz"];
const OBJECT_IO_EXTENSIONS: &[&str] = &[
    ".obj", ".mtl", ".3ds", ".fbx", ".glb", ".gltf", ".svg", ".ply", ".stl",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".tga", ".bmp", ".jpg", ".jpeg", ".sgi", ".rgb", ".rgba", ".tif", ".tiff", ".tx",
    ".jp2", ".j2c", ".hdr", ".dds", ".dpx", ".cin", ".exr", ".webp", ".psd", ".pdd", ".psb",
];
const MOVIE_EXTENSIONS: &[&str] = &[
    ".avi", ".flc", ".mov", ".movie", ".mp4", ".m4v", ".m2v", ".m2t", ".m2ts", ".mts", ".ts",
    ".mv", ".avs", ".wmv", ".ogv", ".r3d", ".dv", ".mpeg", ".mpg", ".mpg2", ".vob", ".mkv",
    ".flv", ".divx", ".xvid", ".mxf", ".webm", ".gif",
];
const SOUND_EXTENSIONS: &[&str] = &[
    ".wav", ".ogg", ".oga", ".mp3", ".mp2", ".ac3", ".aac", ".flac", ".wma", ".eac3", ".aif",
    ".aiff", ".m4a", ".mka", ".opus",
];
const BLEND_EXTENSIONS: &[&str] = &[".blend", ".ble", ".blend.gz"];

fn has_extension(lower: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// `.blend`, `.ble` or `.blend.gz`, case-insensitive.
#[must_use]
pub fn is_blend_path(path: &str) -> bool {
    has_extension(&path.to_ascii_lowercase(), BLEND_EXTENSIONS)
}

/// `.blend1`, `.blend2` ... `.blend32`: ".blend" within the last 8 characters.
fn is_blend_backup(lower: &str) -> bool {
    let len = lower.len();
    let mut window = 7;
    if len == 0 || window >= len {
        return false;
    }
    if len > window + 1 {
        window += 1;
    }
    lower
        .get(len - window..)
        .is_some_and(|tail| tail.contains(".blend"))
}

/// Classify a path by its extension. Always a single bit (or empty).
#[must_use]
pub fn extension_type(path: &Path) -> TypeFlags {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return TypeFlags::empty();
    };
    let lower = name.to_ascii_lowercase();

    if has_extension(&lower, BLEND_EXTENSIONS) {
        TypeFlags::BLENDER
    } else if is_blend_backup(&lower) {
        TypeFlags::BLENDER_BACKUP
    } else if lower.ends_with(".py") {
        TypeFlags::PYSCRIPT
    } else if has_extension(&lower, TEXT_EXTENSIONS) {
        TypeFlags::TEXT
    } else if has_extension(&lower, FONT_EXTENSIONS) {
        TypeFlags::FTFONT
    } else if lower.ends_with(".btx") {
        TypeFlags::BTX
    } else if lower.ends_with(".abc") {
        TypeFlags::ALEMBIC
    } else if has_extension(&lower, USD_EXTENSIONS) {
        TypeFlags::USD
    } else if lower.ends_with(".vdb") {
        TypeFlags::VOLUME
    } else if lower.ends_with(".zip") {
        TypeFlags::ARCHIVE
    } else if has_extension(&lower, OBJECT_IO_EXTENSIONS) {
        TypeFlags::OBJECT_IO
    } else if has_extension(&lower, IMAGE_EXTENSIONS) {
        TypeFlags::IMAGE
    } else if has_extension(&lower, MOVIE_EXTENSIONS) {
        TypeFlags::MOVIE
    } else if has_extension(&lower, SOUND_EXTENSIONS) {
        TypeFlags::SOUND
    } else {
        TypeFlags::empty()
    }
}

/// Short label for listings.
#[must_use]
pub fn type_label(typeflag: TypeFlags) -> &'static str {
    if typeflag.contains(TypeFlags::BLENDERLIB) {
        if typeflag.contains(TypeFlags::DIR) { "group" } else { "datablock" }
    } else if typeflag.contains(TypeFlags::DIR) {
        if typeflag.intersects(TypeFlags::BLEND_FILES) { "library" } else { "dir" }
    } else if typeflag.contains(TypeFlags::BLENDER) {
        "blend"
    } else if typeflag.contains(TypeFlags::BLENDER_BACKUP) {
        "backup"
    } else if typeflag.contains(TypeFlags::IMAGE) {
        "image"
    } else if typeflag.contains(TypeFlags::MOVIE) {
        "movie"
    } else if typeflag.contains(TypeFlags::SOUND) {
        "sound"
    } else if typeflag.contains(TypeFlags::FTFONT) {
        "font"
    } else if typeflag.intersects(TypeFlags::TEXT | TypeFlags::PYSCRIPT) {
        "text"
    } else {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_type_single_bit() {
        let cases = [
            ("scene.blend", TypeFlags::BLENDER),
            ("scene.BLEND", TypeFlags::BLENDER),
            ("scene.blend.gz", TypeFlags::BLENDER),
            ("scene.blend1", TypeFlags::BLENDER_BACKUP),
            ("scene.blend32", TypeFlags::BLENDER_BACKUP),
            ("tool.py", TypeFlags::PYSCRIPT),
            ("notes.txt", TypeFlags::TEXT),
            ("font.woff2", TypeFlags::FTFONT),
            ("cache.abc", TypeFlags::ALEMBIC),
            ("stage.usdz", TypeFlags::USD),
            ("smoke.vdb", TypeFlags::VOLUME),
            ("bundle.zip", TypeFlags::ARCHIVE),
            ("mesh.glb", TypeFlags::OBJECT_IO),
            ("photo.JPG", TypeFlags::IMAGE),
            ("clip.mkv", TypeFlags::MOVIE),
            ("track.flac", TypeFlags::SOUND),
            ("track.ogg", TypeFlags::SOUND),
            ("Makefile", TypeFlags::empty()),
        ];

        for (name, expected) in cases {
            let found = extension_type(Path::new(name));
            assert_eq!(found, expected, "{name}");
            assert!(found.bits().count_ones() <= 1, "{name} yielded several bits");
        }
    }

    #[test]
    fn test_hidden_dot_filename() {
        assert!(is_hidden_dot_filename(".c"));
        assert!(is_hidden_dot_filename("backup~"));
        assert!(is_hidden_dot_filename("sub/.git/config"));
        assert!(!is_hidden_dot_filename(".."));
        assert!(!is_hidden_dot_filename("."));
        assert!(!is_hidden_dot_filename("sub/visible.txt"));
    }

    #[test]
    fn test_entry_flags() {
        let mut entry = InternEntry::new("..", TypeFlags::DIR);
        assert!(entry.is_parent());
        assert!(entry.is_currpar());
        assert!(entry.is_dir());
        assert!(!entry.is_main_data());
        assert!(entry.asset().is_none());

        entry.name = CompactString::const_new("parent");
        assert_eq!(entry.display_name(), "parent");
    }

    #[test]
    fn test_mtime_secs() {
        let stat = EntryStat::new(10, Some(UNIX_EPOCH + std::time::Duration::from_secs(42)));
        assert_eq!(stat.mtime_secs(), 42);
        assert_eq!(EntryStat::default().mtime_secs(), 0);
    }
}
