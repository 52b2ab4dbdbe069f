//! src/main.rs
//! Headless lister: reads one directory, library or asset library through
//! the listing engine and prints the visible entries.

use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chrono::DateTime;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};

use filelist_core::{
    Config, FileList, ListingContext,
    asset::AssetLibraryReference,
    cache::DisplayEntry,
    listing::{FilterOptions, ListingMode, SortKey},
    logging::{LoggerBuilder, shutdown_logging},
    report::ReportLevel,
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Dir,
    Library,
    MainData,
    MainAssets,
    AssetLibrary,
    AllAssetLibraries,
}

impl From<ModeArg> for ListingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dir => Self::Dir,
            ModeArg::Library => Self::Library,
            ModeArg::MainData => Self::MainData,
            ModeArg::MainAssets => Self::MainAssets,
            ModeArg::AssetLibrary => Self::AssetLibrary,
            ModeArg::AllAssetLibraries => Self::AllAssetLibraries,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Date,
    Size,
    Extension,
    Catalog,
}

impl From<SortArg> for SortKey {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Name => Self::Name,
            SortArg::Date => Self::Date,
            SortArg::Size => Self::Size,
            SortArg::Extension => Self::Extension,
            SortArg::Catalog => Self::AssetCatalog,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fl")]
#[command(about = "List a directory or library the way the file browser sees it")]
struct Args {
    /// Directory, library file or path inside a library. Defaults to the
    /// configured root, then the working directory.
    root: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = ModeArg::Dir)]
    mode: ModeArg,

    /// Directory levels to descend (0-4).
    #[arg(short, long)]
    recursion: Option<u32>,

    /// Configured asset library to list, for the asset-library mode.
    #[arg(long)]
    library: Option<String>,

    #[arg(short, long, value_enum)]
    sort: Option<SortArg>,

    #[arg(long, default_value_t = false)]
    invert: bool,

    /// Include dot-files and other hidden entries.
    #[arg(short = 'a', long, default_value_t = false)]
    all: bool,

    /// Only entries whose name or path contains this text.
    #[arg(long)]
    search: Option<String>,

    /// Config file to use instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    /// One JSON object per entry.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path).await?,
        None => Config::load().await.context("Failed to load config")?,
    };

    let mut logger = LoggerBuilder::new().with_config(config.logging.clone());
    if let Some(level) = &args.log_level {
        logger = logger.with_level(level);
    }
    let guard = logger.build().await.context("Failed to initialize logging")?;

    let result = run(&args, &config).await;

    if let Err(err) = shutdown_logging().await {
        eprintln!("fl: log shutdown failed: {err:#}");
    }
    drop(guard);
    result
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    let context = Arc::new(ListingContext::from_config(config));
    let mut list = FileList::from_config(Arc::clone(&context), config);

    let mode = ListingMode::from(args.mode);
    list.settype(mode);
    match (&args.library, mode) {
        (Some(name), _) => list.setlibrary(Some(AssetLibraryReference::Custom(name.as_str().into()))),
        (None, ListingMode::AssetLibrary) => list.setlibrary(Some(AssetLibraryReference::All)),
        _ => {}
    }
    if let Some(level) = args.recursion {
        list.setrecursion(level);
    }

    if args.library.is_none() {
        let root = match args.root.clone().or_else(|| config.listing.root.clone()) {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to read the working directory")?,
        };
        list.setdir(&root);
    }

    list.set_filter(&FilterOptions {
        hide_dot: config.listing.hide_dot && !args.all,
        hide_parent: config.listing.hide_parent,
        filter_glob: config.listing.filter_glob.as_str().into(),
        filter_search: args.search.as_deref().unwrap_or_default().into(),
        ..FilterOptions::default()
    });
    if let Some(sort) = args.sort {
        list.set_sorting(sort.into(), args.invert);
    } else if args.invert {
        list.set_sorting(config.listing.sort, true);
    }

    read(&mut list).await;

    let count = list.files_ensure();
    info!(
        marker = "FL_LISTING_DONE",
        operation_type = "cli",
        root = %list.root().display(),
        visible = count,
        total = list.entries_num(),
        "Listing complete"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for index in 0..count {
        let Some(entry) = list.file(index) else {
            continue;
        };
        if args.json {
            writeln!(out, "{}", entry_json(entry))?;
        } else {
            writeln!(out, "{}", entry_line(entry))?;
        }
    }
    out.flush()?;

    for report in list.reports().drain() {
        let level = match report.level {
            ReportLevel::Info => "info",
            ReportLevel::Warning => "warning",
            ReportLevel::Error => "error",
        };
        eprintln!("fl: {level}: {}", report.message);
    }

    context.shutdown();
    Ok(())
}

/// Drive the read job to completion; Ctrl+C stops it early and lists what
/// was found so far.
async fn read(list: &mut FileList) {
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    list.readjob_start();
    while list.readjob_running() {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                warn!(
                    marker = "FL_INTERRUPTED",
                    operation_type = "cli",
                    progress = list.readjob_progress(),
                    "Interrupted, stopping read"
                );
                interrupted = true;
                list.readjob_stop();
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
        list.readjob_update();
    }
    if list.is_pending() {
        list.readjob_finish();
    }
}

fn entry_line(entry: &DisplayEntry) -> String {
    let kind = if entry.is_dir() { "dir" } else { "file" };
    let size = if entry.is_dir() {
        String::from("-")
    } else {
        ByteSize(entry.size).to_string()
    };
    let mtime = DateTime::from_timestamp(entry.mtime, 0)
        .filter(|_| entry.mtime > 0)
        .map_or_else(|| String::from("-"), |time| time.format("%Y-%m-%d %H:%M").to_string());
    format!("{kind:<4} {size:>10} {mtime:<16} {}", entry.relpath)
}

fn entry_json(entry: &DisplayEntry) -> serde_json::Value {
    serde_json::json!({
        "uid": entry.uid,
        "relpath": entry.relpath.as_str(),
        "name": entry.name.as_str(),
        "dir": entry.is_dir(),
        "size": entry.size,
        "mtime": entry.mtime,
        "typeflag": entry.typeflag.bits(),
        "asset": entry.asset().map(|asset| asset.name.to_string()),
    })
}
