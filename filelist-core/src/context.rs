//! ``src/context.rs``
//!
//! # `ListingContext`: process-scoped collaborators
//!
//! Everything a listing needs from outside the core, each behind a trait
//! object with a no-op default. One context may serve several
//! [`FileList`](crate::filelist::FileList)s; tests build their own so
//! sessions never share state by accident.

use std::sync::Arc;

use tracing::info;

use crate::asset::library::AssetLibraryRegistry;
use crate::cache::index_cache::MemoryIndexer;
use crate::config::Config;
use crate::library::indexer::{FileIndexer, NoopIndexer};
use crate::library::main_data::{MainDataSource, NoMainData};
use crate::library::reader::{LibraryReader, NullLibraryReader};
use crate::preview::thumbnail::{DiskThumbnailLoader, NoThumbnails, ThumbnailLoader};
use crate::remote::downloader::{NoopDownloader, RemoteDownloader};
use crate::remote::status::RemoteLibraryStatusTracker;

#[derive(Debug, Clone)]
pub struct ListingContext {
    pub library_reader: Arc<dyn LibraryReader>,
    pub indexer: Arc<dyn FileIndexer>,
    pub main_data: Arc<dyn MainDataSource>,
    pub asset_libraries: Arc<AssetLibraryRegistry>,
    pub remote_status: Arc<RemoteLibraryStatusTracker>,
    pub downloader: Arc<dyn RemoteDownloader>,
    pub thumbnails: Arc<dyn ThumbnailLoader>,
}

impl Default for ListingContext {
    fn default() -> Self {
        Self {
            library_reader: Arc::new(NullLibraryReader),
            indexer: Arc::new(NoopIndexer),
            main_data: Arc::new(NoMainData),
            asset_libraries: Arc::new(AssetLibraryRegistry::default()),
            remote_status: Arc::new(RemoteLibraryStatusTracker::default()),
            downloader: Arc::new(NoopDownloader),
            thumbnails: Arc::new(NoThumbnails),
        }
    }
}

impl ListingContext {
    /// Context wired from configuration: configured asset libraries, an
    /// in-memory index cache and, when previews are on, the disk thumbnail
    /// cache.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut context = Self {
            indexer: Arc::new(MemoryIndexer::with_config(&config.cache)),
            asset_libraries: Arc::new(AssetLibraryRegistry::new(config.asset_libraries.clone())),
            ..Self::default()
        };
        if config.previews.enabled {
            context.thumbnails = Arc::new(DiskThumbnailLoader::new(config.previews.thumbnail_dir()));
        }
        context
    }

    #[must_use]
    pub fn with_library_reader(mut self, reader: Arc<dyn LibraryReader>) -> Self {
        self.library_reader = reader;
        self
    }

    #[must_use]
    pub fn with_indexer(mut self, indexer: Arc<dyn FileIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    #[must_use]
    pub fn with_main_data(mut self, main_data: Arc<dyn MainDataSource>) -> Self {
        self.main_data = main_data;
        self
    }

    #[must_use]
    pub fn with_asset_libraries(mut self, registry: Arc<AssetLibraryRegistry>) -> Self {
        self.asset_libraries = registry;
        self
    }

    #[must_use]
    pub fn with_remote_status(mut self, tracker: Arc<RemoteLibraryStatusTracker>) -> Self {
        self.remote_status = tracker;
        self
    }

    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn RemoteDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn with_thumbnails(mut self, loader: Arc<dyn ThumbnailLoader>) -> Self {
        self.thumbnails = loader;
        self
    }

    /// Release loaded asset libraries. Listings still holding entries see
    /// their asset references go dead.
    pub fn shutdown(&self) {
        self.asset_libraries.shutdown();
        info!(
            marker = "LISTING_CONTEXT_SHUTDOWN",
            operation_type = "context",
            "Listing context shut down"
        );
    }
}
