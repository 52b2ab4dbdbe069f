pub mod error;

pub mod config;

pub mod logging;
pub use logging::{LoggerBuilder, LoggerConfig};

pub mod report;
pub use report::{Report, ReportLevel, ReportList};

pub mod model {
    pub mod entry;
    pub use entry::{EntryStat, FileAttributes, InternEntry, TypeFlags, Uid};

    pub mod id_code;
    pub use id_code::{IdCode, IdFilter};

    pub mod entry_store;
    pub use entry_store::EntryStore;

    pub mod selection;
    pub use selection::{SelectCheck, SelectFlags, SelectOp, Selection};
}

pub mod asset {
    pub mod catalog;
    pub use catalog::{CatalogEntry, CatalogService};

    pub mod library;
    pub use library::{
        AssetHandle, AssetLibrary, AssetLibraryDefinition, AssetLibraryReference,
        AssetLibraryRegistry, AssetMetaData, AssetRepresentation,
    };
}

pub mod listing {
    pub mod glob;

    pub mod filter;
    pub use filter::{CatalogVisibility, FilterConfig, FilterFlags, FilterOptions};

    pub mod sort;
    pub use sort::SortKey;

    pub mod mode;
    pub use mode::{ListingBehavior, ListingMode, ModeTags};
}

pub mod cache {
    pub mod entry_cache;
    pub use entry_cache::{DisplayEntry, EntryCache, EntryFlags};

    pub mod index_cache;
    pub use index_cache::MemoryIndexer;
}

pub mod preview {
    pub mod thumbnail;
    pub use thumbnail::{DiskThumbnailLoader, PreviewImage, ThumbnailLoader};

    pub mod pipeline;
    pub use pipeline::PreviewPipeline;
}

pub mod fs {
    pub mod dir_scanner;

    pub mod paths;
}

pub mod library {
    pub mod reader;
    pub use reader::{DatablockInfo, LibraryHandle, LibraryReader};

    pub mod indexer;
    pub use indexer::FileIndexer;

    pub mod main_data;
    pub use main_data::{MainDataItem, MainDataSource};
}

pub mod remote {
    pub mod status;
    pub use status::{RemoteLibraryStatusTracker, RemoteStatus};

    pub mod downloader;
    pub use downloader::{AssetDownloadRequest, RemoteDownloader};

    pub mod pages;
}

pub mod operators {
    pub mod read_job;
    pub use read_job::{ReadJob, ReadJobSettings, ReadJobState};

    pub mod dir_walk;

    pub mod asset_walk;
}

pub mod context;
pub use context::ListingContext;

pub mod filelist;
pub use filelist::{FileList, ListFlags};

pub use config::Config;
pub use error::{CoreError, CoreResult};
