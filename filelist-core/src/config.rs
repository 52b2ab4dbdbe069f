//! ``src/config.rs``
//! ============================================================================
//! # Config: listing engine configuration loader and saver
//!
//! User-editable settings for listings, caches, previews, remote libraries
//! and logging. Stored as TOML at the platform config path resolved through
//! [`directories`](https://docs.rs/directories).
//!
//! ## Example
//! ```rust,ignore
//! let config = Config::load().await?;
//! let context = ListingContext::from_config(&config);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs as TokioFs;
use tracing::info;

use crate::asset::library::AssetLibraryDefinition;
use crate::cache::entry_cache::{DEFAULT_CACHE_SIZE, MAX_CACHE_SIZE};
use crate::listing::sort::SortKey;
use crate::logging::LoggerConfig;
use crate::operators::dir_walk::MAX_RECURSION;

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "filelist";
const APPLICATION: &str = "FileList";

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory."))
}

/// Defaults for a freshly opened listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub root: Option<PathBuf>,

    /// Directory levels to descend, `0..=4`.
    pub recursion: u32,

    pub hide_dot: bool,

    pub hide_parent: bool,

    pub sort: SortKey,

    pub invert_sort: bool,

    /// `;`-separated globs marking operator files.
    pub filter_glob: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            root: None,
            recursion: 0,
            hide_dot: true,
            hide_parent: false,
            sort: SortKey::Name,
            invert_sort: false,
            filter_glob: String::new(),
        }
    }
}

impl ListingConfig {
    /// Recursion level clamped to the supported range.
    #[must_use]
    pub fn recursion_level(&self) -> u32 {
        self.recursion.min(MAX_RECURSION)
    }
}

/// Display window and library index cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries materialized around the visible range.
    pub block_window: usize,

    /// Upper bound for the sliding window.
    pub max_window: usize,

    /// Library files kept in the index cache.
    pub index_capacity: u64,

    #[serde(with = "humantime_serde")]
    pub index_ttl: Duration,

    pub enable_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_window: DEFAULT_CACHE_SIZE,
            max_window: MAX_CACHE_SIZE,
            index_capacity: 1024,
            index_ttl: Duration::from_secs(1800),
            enable_stats: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,

    pub workers: usize,

    /// Thumbnail cache directory; platform cache dir when unset.
    pub thumbnail_dir: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 2,
            thumbnail_dir: None,
        }
    }
}

impl PreviewConfig {
    #[must_use]
    pub fn thumbnail_dir(&self) -> PathBuf {
        if let Some(dir) = &self.thumbnail_dir {
            return dir.clone();
        }
        project_dirs().map_or_else(
            |_| std::env::temp_dir().join("filelist-thumbnails"),
            |dirs| dirs.cache_dir().join("thumbnails"),
        )
    }
}

/// Remote asset library polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Silence after which a loading library is failed.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub poll_interval_min: Duration,

    #[serde(with = "humantime_serde")]
    pub poll_interval_max: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval_min: Duration::from_millis(20),
            poll_interval_max: Duration::from_millis(500),
        }
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listing: ListingConfig,

    pub cache: CacheConfig,

    pub previews: PreviewConfig,

    pub remote: RemoteConfig,

    pub asset_libraries: Vec<AssetLibraryDefinition>,

    pub logging: LoggerConfig,
}

impl Config {
    /// Loads config from the platform config dir, writing defaults when no
    /// file exists yet.
    pub async fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if TokioFs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from(&path).await
        } else {
            info!(
                marker = "CONFIG_DEFAULT_CREATED",
                operation_type = "config",
                path = %path.display(),
                "No config file found, writing defaults"
            );
            let default_config = Self::default();
            default_config.save_to(&path).await?;
            Ok(default_config)
        }
    }

    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        info!(
            marker = "CONFIG_LOAD",
            operation_type = "config",
            path = %path.display(),
            "Loading config"
        );
        let text = TokioFs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?).await
    }

    pub async fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        info!(
            marker = "CONFIG_SAVE",
            operation_type = "config",
            path = %path.display(),
            "Saving config"
        );
        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        TokioFs::write(path, toml_str).await?;
        Ok(())
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(project_dirs()?.config_dir().to_path_buf())
    }
}
