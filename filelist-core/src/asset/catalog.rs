//! `src/asset/catalog.rs`
//!
//! Asset catalogs as stored next to an asset library in
//! `blender_assets.cats.txt`:
//!
//! ```text
//! # comment
//! VERSION 1
//! 313ea471-7c64-4e3c-9a5d-1a6f2b3c4d5e:props/furniture:props-furniture
//! ```
//!
//! Catalog paths are `/` separated; a catalog contains every catalog whose
//! path starts with its own path followed by `/`.

use std::path::Path;

use compact_str::CompactString;
use hashbrown::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

pub const CATALOG_DEFINITION_FILENAME: &str = "blender_assets.cats.txt";
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub path: CompactString,
    pub simple_name: CompactString,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogService {
    catalogs: HashMap<Uuid, CatalogEntry>,
}

impl CatalogService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `blender_assets.cats.txt` from a library root. A missing file is an
    /// empty service, not an error.
    pub fn load_from_dir(root: &Path) -> CoreResult<Self> {
        let path = root.join(CATALOG_DEFINITION_FILENAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut service = Self::new();
        let mut version_seen = false;

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(version) = line.strip_prefix("VERSION ") {
                let version: u32 = version
                    .trim()
                    .parse()
                    .map_err(|_| CoreError::parse_error(line, "catalog VERSION number"))?;
                if version != SUPPORTED_VERSION {
                    return Err(CoreError::parse_error(line, "catalog definition VERSION 1"));
                }
                version_seen = true;
                continue;
            }

            if !version_seen {
                return Err(CoreError::parse_error(line, "VERSION line before catalogs"));
            }

            let mut parts = line.splitn(3, ':');
            let (Some(id), Some(path)) = (parts.next(), parts.next()) else {
                return Err(CoreError::parse_error(line, "uuid:path:simple_name"));
            };
            let id = Uuid::parse_str(id.trim())
                .map_err(|_| CoreError::parse_error(id, "catalog UUID"))?;
            let path = normalize_catalog_path(path);
            let simple_name = parts.next().map_or_else(
                || CompactString::from(path.replace('/', "-")),
                |name| CompactString::from(name.trim()),
            );

            service.insert(CatalogEntry { id, path, simple_name });
        }

        Ok(service)
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.catalogs.insert(entry.id, entry);
    }

    #[must_use]
    pub fn find(&self, id: &Uuid) -> Option<&CatalogEntry> {
        self.catalogs.get(id)
    }

    #[must_use]
    pub fn is_known(&self, id: &Uuid) -> bool {
        self.catalogs.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    /// The catalog itself plus every catalog nested below its path.
    #[must_use]
    pub fn with_descendants(&self, id: &Uuid) -> HashSet<Uuid> {
        let Some(root) = self.catalogs.get(id) else {
            return HashSet::new();
        };

        self.catalogs
            .values()
            .filter(|entry| is_path_within(&entry.path, &root.path))
            .map(|entry| entry.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.catalogs.values()
    }
}

fn normalize_catalog_path(path: &str) -> CompactString {
    path.split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
        .into()
}

/// `a/b` is within `a`, `a` is within `a`, `ab` is not within `a`.
#[must_use]
pub fn is_path_within(path: &str, parent: &str) -> bool {
    path == parent
        || (path.starts_with(parent) && path.as_bytes().get(parent.len()) == Some(&b'/'))
}
