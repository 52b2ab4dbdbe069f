//! ``src/operators/read_job.rs``
//! ============================================================================
//! # Read job: the background scan feeding the entry store
//!
//! `Idle -> Running -> {Finished, Cancelled}`. The job works on its own copy
//! of the listing settings ([`ReadJobSettings`]), appends batches to the
//! shared [`EntryStore`] and raises a `do_update` flag for the consumer. It
//! never touches the display cache.
//!
//! Threaded jobs run on `tokio::task::spawn_blocking`; modes that must stay
//! on the caller run through [`ReadJob::run_blocking`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::asset::library::{AssetLibrary, AssetLibraryReference};
use crate::config::RemoteConfig;
use crate::context::ListingContext;
use crate::error::{CoreError, CoreResult};
use crate::listing::glob::GlobFilter;
use crate::listing::mode::ListingMode;
use crate::model::entry::{InternEntry, Uid};
use crate::model::entry_store::EntryStore;
use crate::report::ReportList;

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadJobState {
    Idle,
    Running,
    Finished,
    Cancelled,
}

impl ReadJobState {
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// Private copy of everything the job reads from the listing.
#[derive(Debug, Clone)]
pub struct ReadJobSettings {
    pub root: PathBuf,
    pub mode: ListingMode,
    pub max_recursion: u32,
    pub filter_glob: GlobFilter,
    /// Only re-add entries mirroring in-memory data.
    pub only_main_data: bool,
    pub asset_library: Option<AssetLibraryReference>,
    pub reload_asset_library: bool,
    pub remote: RemoteConfig,
}

impl ReadJobSettings {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, mode: ListingMode) -> Self {
        Self {
            root: root.into(),
            mode,
            max_recursion: 0,
            filter_glob: GlobFilter::default(),
            only_main_data: false,
            asset_library: None,
            reload_asset_library: false,
            remote: RemoteConfig::default(),
        }
    }
}

/// State shared between the job thread and its owner.
#[derive(Debug)]
pub(crate) struct ReadJobShared {
    state: Mutex<ReadJobState>,
    /// `f32` bits.
    progress: AtomicU32,
    do_update: AtomicBool,
    added: AtomicUsize,
    pub(crate) cancel: CancellationToken,
    asset_library: Mutex<Option<Arc<AssetLibrary>>>,
    /// Store generation the job writes under; `None` takes the current one
    /// when the run begins.
    store_generation: Option<u64>,
}

impl ReadJobShared {
    pub(crate) fn new(asset_library: Option<Arc<AssetLibrary>>) -> Self {
        Self {
            state: Mutex::new(ReadJobState::Idle),
            progress: AtomicU32::new(0.0_f32.to_bits()),
            do_update: AtomicBool::new(false),
            added: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            asset_library: Mutex::new(asset_library),
            store_generation: None,
        }
    }

    /// Pin the job to the store generation current at start, before any
    /// reset the owner might run after stopping it.
    pub(crate) fn for_generation(mut self, generation: u64) -> Self {
        self.store_generation = Some(generation);
        self
    }

    pub(crate) fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// Clamp to `[0, 1]`; once `1.0` was reached the value stays there.
    fn set_progress(&self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let _ = self
            .progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (f32::from_bits(bits) < 1.0).then_some(value.to_bits())
            });
    }
}

// ------------------------------------------------------------
// ReadJobRun: what a listing mode sees while reading
// ------------------------------------------------------------

/// Handle passed to [`ListingBehavior::read`](crate::listing::mode::ListingBehavior::read).
#[derive(Debug)]
pub struct ReadJobRun<'a> {
    pub settings: &'a ReadJobSettings,
    pub context: &'a ListingContext,
    pub reports: &'a ReportList,
    /// Library new assets are registered with, if any.
    pub load_asset_library: Option<Arc<AssetLibrary>>,
    store: &'a EntryStore,
    shared: &'a ReadJobShared,
    generation: u64,
}

impl<'a> ReadJobRun<'a> {
    pub(crate) fn new(
        settings: &'a ReadJobSettings,
        context: &'a ListingContext,
        store: &'a EntryStore,
        reports: &'a ReportList,
        shared: &'a ReadJobShared,
    ) -> Self {
        Self {
            settings,
            context,
            reports,
            load_asset_library: shared.asset_library.lock().clone(),
            store,
            shared,
            generation: shared
                .store_generation
                .unwrap_or_else(|| store.generation()),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn generate_uid(&self) -> Uid {
        self.store.generate_uid()
    }

    /// Flush a batch into the store. Entries must already carry UIDs.
    /// Dropped once the job is cancelled or the store was reset since the
    /// job started.
    pub fn append(&self, batch: Vec<InternEntry>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let count = batch.len();
        if !self.store.append_if_current(self.generation, batch) {
            return false;
        }
        self.shared.added.fetch_add(count, Ordering::Relaxed);
        self.shared.do_update.store(true, Ordering::Release);
        true
    }

    pub fn set_progress(&self, value: f32) {
        self.shared.set_progress(value);
    }

    /// Sleep up to `duration`; returns `false` when woken by cancellation.
    pub fn sleep_cancellable(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

// ------------------------------------------------------------
// ReadJob
// ------------------------------------------------------------

#[derive(Debug)]
pub struct ReadJob {
    shared: Arc<ReadJobShared>,
    handle: Option<JoinHandle<()>>,
    mode: ListingMode,
}

impl ReadJob {
    /// Start reading on the tokio blocking pool. Needs a runtime.
    pub fn start(
        settings: ReadJobSettings,
        context: Arc<ListingContext>,
        store: Arc<EntryStore>,
        reports: ReportList,
        asset_library: Option<Arc<AssetLibrary>>,
    ) -> CoreResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::invalid_state("read job started outside a tokio runtime"))?;

        let mode = settings.mode;
        let shared = Arc::new(ReadJobShared::new(asset_library).for_generation(store.generation()));
        *shared.state.lock() = ReadJobState::Running;

        let handle = runtime.spawn_blocking({
            let shared = Arc::clone(&shared);
            move || execute(&settings, &context, &store, &reports, &shared)
        });

        Ok(Self {
            shared,
            handle: Some(handle),
            mode,
        })
    }

    /// Read on the calling thread; returns once the job is done.
    pub fn run_blocking(
        settings: &ReadJobSettings,
        context: &ListingContext,
        store: &EntryStore,
        reports: &ReportList,
        asset_library: Option<Arc<AssetLibrary>>,
    ) -> Self {
        let shared = Arc::new(ReadJobShared::new(asset_library).for_generation(store.generation()));
        *shared.state.lock() = ReadJobState::Running;
        execute(settings, context, store, reports, &shared);
        Self {
            shared,
            handle: None,
            mode: settings.mode,
        }
    }

    /// Ask the job to stop; it notices at its next cancellation point.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    #[must_use]
    pub fn state(&self) -> ReadJobState {
        *self.shared.state.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ReadJobState::Running
    }

    #[must_use]
    pub const fn mode(&self) -> ListingMode {
        self.mode
    }

    #[must_use]
    pub fn progress(&self) -> f32 {
        self.shared.progress()
    }

    /// Entries appended so far.
    #[must_use]
    pub fn entries_added(&self) -> usize {
        self.shared.added.load(Ordering::Relaxed)
    }

    /// Consume the "new entries" signal.
    pub fn take_update(&self) -> bool {
        self.shared.do_update.swap(false, Ordering::AcqRel)
    }

    /// The asset library the job loaded, handed over once.
    pub fn take_asset_library(&self) -> Option<Arc<AssetLibrary>> {
        self.shared.asset_library.lock().take()
    }

    /// Wait for a threaded job to end. A job that panicked ends up
    /// [`ReadJobState::Cancelled`].
    pub async fn wait(&mut self) -> CoreResult<ReadJobState> {
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_panic() => {
                    let mut state = self.shared.state.lock();
                    if *state == ReadJobState::Running {
                        *state = ReadJobState::Cancelled;
                    }
                }
                Err(err) => return Err(CoreError::task_failed("read_job", &err.to_string())),
            }
        }
        Ok(self.state())
    }
}

/// Moves a job that never reached a final state (the listing mode
/// panicked) to `Cancelled`, so owners polling the state do not spin.
struct FinalStateGuard<'a> {
    shared: &'a ReadJobShared,
    reports: &'a ReportList,
}

impl Drop for FinalStateGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if *state != ReadJobState::Running {
            return;
        }
        *state = ReadJobState::Cancelled;
        drop(state);

        self.shared.cancel.cancel();
        self.reports.error("Reading the listing failed unexpectedly");
        error!(
            marker = "READ_JOB_ABORTED",
            operation_type = "read_job",
            added = self.shared.added.load(Ordering::Relaxed),
            "Read job ended without a final state"
        );
    }
}

#[instrument(level = "debug", skip_all, fields(mode = ?settings.mode, root = %settings.root.display()))]
fn execute(
    settings: &ReadJobSettings,
    context: &ListingContext,
    store: &EntryStore,
    reports: &ReportList,
    shared: &ReadJobShared,
) {
    let start = Instant::now();
    let _final_state = FinalStateGuard { shared, reports };
    let behavior = settings.mode.behavior();

    if !behavior.check_dir(&settings.root) {
        reports.error(format!("Invalid listing root: {}", settings.root.display()));
        *shared.state.lock() = ReadJobState::Cancelled;
        warn!(
            marker = "READ_JOB_INVALID_ROOT",
            operation_type = "read_job",
            root = %settings.root.display(),
            "Read job aborted"
        );
        return;
    }

    info!(
        marker = "READ_JOB_STARTED",
        operation_type = "read_job",
        mode = ?settings.mode,
        root = %settings.root.display(),
        max_recursion = settings.max_recursion,
        only_main_data = settings.only_main_data,
        "Read job started"
    );

    let mut run = ReadJobRun::new(settings, context, store, reports, shared);
    behavior.read(&mut run);
    let loaded = run.load_asset_library.take();
    *shared.asset_library.lock() = loaded;

    let cancelled = shared.cancel.is_cancelled();
    let state = if cancelled {
        ReadJobState::Cancelled
    } else {
        shared.set_progress(1.0);
        ReadJobState::Finished
    };
    *shared.state.lock() = state;

    let added = shared.added.load(Ordering::Relaxed);
    if cancelled {
        debug!(
            marker = "READ_JOB_CANCELLED",
            operation_type = "read_job",
            added = added,
            "Read job cancelled"
        );
    } else {
        info!(
            marker = "READ_JOB_FINISHED",
            operation_type = "read_job",
            added = added,
            duration_ms = start.elapsed().as_millis() as u64,
            "Read job finished"
        );
    }
}
