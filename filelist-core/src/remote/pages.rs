//! `src/remote/pages.rs`
//!
//! Metadata pages synced by the downloader into `<library root>/_meta/`.
//! Each page is a JSON document `{ "assets": [ ... ] }`; pages may appear
//! one after another while a sync is running.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ahash::AHashSet;
use compact_str::CompactString;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::asset::library::{AssetMetaData, OnlineAssetInfo};
use crate::error::{CoreError, CoreResult};
use crate::model::id_code::IdCode;

pub const META_DIR: &str = "_meta";
pub const PAGE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteAssetRecord {
    pub name: CompactString,
    pub id_type: IdCode,
    /// Library file holding the asset, relative to the library root.
    pub file: CompactString,
    pub url: CompactString,
    pub hash: CompactString,
    #[serde(default)]
    pub catalog_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<CompactString>,
    #[serde(default)]
    pub description: Option<CompactString>,
    #[serde(default)]
    pub author: Option<CompactString>,
}

impl RemoteAssetRecord {
    #[must_use]
    pub fn metadata(&self) -> AssetMetaData {
        AssetMetaData {
            catalog_id: self.catalog_id,
            catalog_simple_name: CompactString::default(),
            tags: self.tags.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            online: Some(OnlineAssetInfo {
                url: self.url.clone(),
                content_hash: self.hash.clone(),
                file: self.file.clone(),
            }),
        }
    }

    /// `file.blend/Group/name`, relative to the library root.
    #[must_use]
    pub fn relpath(&self) -> CompactString {
        CompactString::from(format!("{}/{}/{}", self.file, self.id_type.group_name(), self.name))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteAssetPage {
    #[serde(default)]
    pub assets: Vec<RemoteAssetRecord>,
}

pub fn parse_page(text: &str) -> CoreResult<RemoteAssetPage> {
    Ok(serde_json::from_str(text)?)
}

pub fn read_page(path: &Path) -> CoreResult<RemoteAssetPage> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|err| CoreError::parse_error(&path.to_string_lossy(), &format!("asset page ({err})")))
}

/// Remembers which pages were read, so a re-scan only returns new or
/// rewritten ones.
#[derive(Debug, Default)]
pub struct PageScanner {
    seen: AHashSet<(PathBuf, SystemTime)>,
}

impl PageScanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages under `root/_meta` not returned before, in path order. A
    /// missing directory yields nothing.
    pub fn new_pages(&mut self, root: &Path) -> CoreResult<Vec<PathBuf>> {
        let dir = root.join(META_DIR);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut pages = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PAGE_EXTENSION) {
                continue;
            }
            let mtime = dir_entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if self.seen.insert((path.clone(), mtime)) {
                pages.push(path);
            }
        }
        pages.sort();

        if !pages.is_empty() {
            debug!(
                marker = "REMOTE_PAGES_FOUND",
                operation_type = "remote_pages",
                root = %root.display(),
                count = pages.len(),
                "New remote metadata pages"
            );
        }
        Ok(pages)
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAGE: &str = r#"{
        "assets": [
            {
                "name": "Chair",
                "id_type": "Object",
                "file": "furniture/chairs.blend",
                "url": "https://assets.example.org/chairs.blend",
                "hash": "sha256:abc",
                "tags": ["wood", "seat"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_page() {
        let page = parse_page(PAGE).unwrap();
        assert_eq!(page.assets.len(), 1);

        let record = &page.assets[0];
        assert_eq!(record.relpath(), "furniture/chairs.blend/Object/Chair");
        let metadata = record.metadata();
        assert_eq!(metadata.tags.len(), 2);
        assert_eq!(metadata.online.unwrap().content_hash, "sha256:abc");

        assert!(parse_page("{\"assets\": 3}").is_err());
    }

    #[test]
    fn test_scanner_returns_only_new_pages() {
        let tmp = TempDir::new().unwrap();
        let mut scanner = PageScanner::new();
        assert!(scanner.new_pages(tmp.path()).unwrap().is_empty());

        let meta = tmp.path().join(META_DIR);
        fs::create_dir(&meta).unwrap();
        fs::write(meta.join("page_001.json"), PAGE).unwrap();
        fs::write(meta.join("notes.txt"), "ignored").unwrap();

        let first = scanner.new_pages(tmp.path()).unwrap();
        assert_eq!(first, vec![meta.join("page_001.json")]);
        assert!(scanner.new_pages(tmp.path()).unwrap().is_empty());

        fs::write(meta.join("page_002.json"), PAGE).unwrap();
        assert_eq!(scanner.new_pages(tmp.path()).unwrap(), vec![meta.join("page_002.json")]);

        let page = read_page(&meta.join("page_002.json")).unwrap();
        assert_eq!(page.assets[0].name, "Chair");
    }
}
