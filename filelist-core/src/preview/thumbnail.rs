//! `src/preview/thumbnail.rs`
//! ============================================================================
//! # Thumbnail cache on disk
//!
//! Layout: `<dir>/<first two hex chars>/<remaining 30 hex chars><ext>`, the
//! hex string being the MD5 of the address (usually a `file://` URI). A
//! cached thumbnail is fresh while its mtime is not older than the source.
//!
//! Decoding images is left to the host: previews are opaque byte blobs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::model::entry::TypeFlags;

/// Opaque, cheaply clonable preview payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage(Bytes);

impl PreviewImage {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbSource {
    Image,
    Blend,
    Movie,
    Font,
}

impl ThumbSource {
    #[must_use]
    pub fn from_typeflag(typeflag: TypeFlags) -> Self {
        if typeflag.contains(TypeFlags::IMAGE) {
            Self::Image
        } else if typeflag.intersects(TypeFlags::BLEND_FILES | TypeFlags::BLENDERLIB) {
            Self::Blend
        } else if typeflag.contains(TypeFlags::MOVIE) {
            Self::Movie
        } else if typeflag.contains(TypeFlags::FTFONT) {
            Self::Font
        } else {
            Self::Image
        }
    }
}

/// Hex MD5 of `address`.
#[must_use]
pub fn address_hash(address: &str) -> String {
    format!("{:x}", md5::compute(address.as_bytes()))
}

/// Cache location for `address`. `ext` includes its dot, or is empty.
#[must_use]
pub fn thumbnail_path(dir: &Path, address: &str, ext: &str) -> PathBuf {
    let hex = address_hash(address);
    let (prefix, rest) = hex.split_at(2);
    dir.join(prefix).join(format!("{rest}{ext}"))
}

#[must_use]
pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Produces preview bytes for a path. Runs on preview worker threads.
pub trait ThumbnailLoader: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` means "no preview available", which marks the entry so it
    /// is not retried every frame.
    fn load(&self, path: &Path, source: ThumbSource, offline: bool) -> CoreResult<Option<PreviewImage>>;
}

/// Never produces previews.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThumbnails;

impl ThumbnailLoader for NoThumbnails {
    fn load(&self, _path: &Path, _source: ThumbSource, _offline: bool) -> CoreResult<Option<PreviewImage>> {
        Ok(None)
    }
}

/// Reads thumbnails from the disk cache and fills it for image sources by
/// storing the source bytes. Other sources only ever read the cache.
#[derive(Debug)]
pub struct DiskThumbnailLoader {
    dir: PathBuf,
    /// Serialises work on the same source path across workers.
    path_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DiskThumbnailLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            path_locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cache_path(&self, source_path: &Path) -> PathBuf {
        let ext = source_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        thumbnail_path(&self.dir, &file_uri(source_path), &ext)
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(
            self.path_locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn read_fresh(cached: &Path, source_mtime: Option<SystemTime>) -> CoreResult<Option<PreviewImage>> {
        let metadata = match fs::metadata(cached) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let fresh = match (metadata.modified().ok(), source_mtime) {
            (Some(thumb), Some(source)) => thumb >= source,
            _ => true,
        };
        if !fresh {
            trace!(path = %cached.display(), "Stale thumbnail");
            return Ok(None);
        }

        Ok(Some(PreviewImage::new(fs::read(cached)?)))
    }

    fn store(cached: &Path, bytes: &[u8]) -> CoreResult<()> {
        let parent = cached
            .parent()
            .ok_or_else(|| CoreError::invalid_state("thumbnail path has no parent"))?;
        fs::create_dir_all(parent)?;

        let tmp = cached.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, cached)?;
        Ok(())
    }
}

impl ThumbnailLoader for DiskThumbnailLoader {
    fn load(&self, path: &Path, source: ThumbSource, offline: bool) -> CoreResult<Option<PreviewImage>> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let cached = self.cache_path(path);
        let source_mtime = fs::metadata(path).and_then(|m| m.modified()).ok();

        if let Some(preview) = Self::read_fresh(&cached, source_mtime)? {
            return Ok(Some(preview));
        }

        // Offline files are never fetched just to build a thumbnail.
        if offline || source != ThumbSource::Image {
            return Ok(None);
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CoreError::preview(&path.to_string_lossy(), &err.to_string())),
        };
        Self::store(&cached, &bytes)?;
        debug!(
            marker = "THUMBNAIL_STORED",
            operation_type = "preview",
            source = %path.display(),
            "Thumbnail cached"
        );
        Ok(Some(PreviewImage::new(bytes)))
    }
}
