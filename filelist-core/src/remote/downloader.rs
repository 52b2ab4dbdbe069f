//! `src/remote/downloader.rs`
//!
//! Hook for the external downloader of remote asset libraries. Requests are
//! fire-and-forget; progress comes back only through pings on the
//! [`RemoteLibraryStatusTracker`](crate::remote::status::RemoteLibraryStatusTracker).

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::CoreResult;

/// Everything needed to fetch one asset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDownloadRequest {
    pub library_url: CompactString,
    pub library_root: PathBuf,
    pub asset_url: CompactString,
    pub content_hash: CompactString,
    pub destination: PathBuf,
}

pub trait RemoteDownloader: Send + Sync + Debug {
    /// Ask for the library's metadata pages to be synced into `local_path`.
    fn request_library_sync(&self, url: &str, local_path: &Path) -> CoreResult<()>;

    fn request_asset_file_download(&self, request: &AssetDownloadRequest) -> CoreResult<()>;
}

/// Accepts and drops every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDownloader;

impl RemoteDownloader for NoopDownloader {
    fn request_library_sync(&self, url: &str, local_path: &Path) -> CoreResult<()> {
        debug!(
            marker = "REMOTE_SYNC_IGNORED",
            operation_type = "remote_download",
            url = url,
            path = %local_path.display(),
            "No downloader configured"
        );
        Ok(())
    }

    fn request_asset_file_download(&self, request: &AssetDownloadRequest) -> CoreResult<()> {
        debug!(
            marker = "REMOTE_DOWNLOAD_IGNORED",
            operation_type = "remote_download",
            url = %request.asset_url,
            "No downloader configured"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    LibrarySync { url: CompactString, local_path: PathBuf },
    AssetFile(AssetDownloadRequest),
}

/// Keeps every request for inspection; hosts driving their own download
/// loop can drain it.
#[derive(Debug, Default)]
pub struct QueueingDownloader {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl QueueingDownloader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut *self.requests.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}

impl RemoteDownloader for QueueingDownloader {
    fn request_library_sync(&self, url: &str, local_path: &Path) -> CoreResult<()> {
        self.requests.lock().push(RecordedRequest::LibrarySync {
            url: CompactString::from(url),
            local_path: local_path.to_path_buf(),
        });
        Ok(())
    }

    fn request_asset_file_download(&self, request: &AssetDownloadRequest) -> CoreResult<()> {
        self.requests
            .lock()
            .push(RecordedRequest::AssetFile(request.clone()));
        Ok(())
    }
}
