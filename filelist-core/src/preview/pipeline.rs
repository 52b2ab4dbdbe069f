//! `src/preview/pipeline.rs`
//! ============================================================================
//! # Preview pipeline
//!
//! Loads previews for cached entries on a small rayon pool and hands results
//! back through a crossbeam done-queue. Workers never touch the entry cache;
//! only [`PreviewPipeline::update`], called on the consumer thread, does.
//!
//! `clear()` is deterministic: queued tasks are skipped through a generation
//! counter, running ones are waited for, and their results are discarded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, instrument, warn};

use crate::cache::entry_cache::{DisplayEntry, EntryCache, EntryFlags};
use crate::model::entry::{FileAttributes, TypeFlags, Uid};
use crate::preview::thumbnail::{PreviewImage, ThumbSource, ThumbnailLoader};

/// What a worker sends back.
#[derive(Debug)]
pub struct PreviewResult {
    pub index: usize,
    pub uid: Uid,
    pub preview: Option<PreviewImage>,
}

#[derive(Debug, Default)]
struct Shared {
    /// Bumped by `clear`; tasks queued under an older value do nothing.
    generation: AtomicU64,
    /// Tasks queued or running.
    in_flight: Mutex<usize>,
    idle: Condvar,
}

/// Answers for one queued task: keeps `in_flight` balanced and, if the
/// loader panicked mid-task, reports the entry as having no preview.
struct TaskGuard {
    shared: Arc<Shared>,
    done_tx: Sender<PreviewResult>,
    /// Set while the loader runs.
    loading: Option<(usize, Uid)>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some((index, uid)) = self.loading.take() {
            let _ = self.done_tx.send(PreviewResult { index, uid, preview: None });
        }
        let mut in_flight = self.shared.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.shared.idle.notify_all();
        }
    }
}

#[derive(Debug)]
pub struct PreviewPipeline {
    loader: Arc<dyn ThumbnailLoader>,
    workers: usize,
    pool: Option<ThreadPool>,
    done_tx: Sender<PreviewResult>,
    done_rx: Receiver<PreviewResult>,
    shared: Arc<Shared>,
    todo_count: usize,
    active: bool,
}

impl PreviewPipeline {
    #[must_use]
    pub fn new(loader: Arc<dyn ThumbnailLoader>, workers: usize) -> Self {
        let (done_tx, done_rx) = channel::unbounded();
        Self {
            loader,
            workers: workers.max(1),
            pool: None,
            done_tx,
            done_rx,
            shared: Arc::new(Shared::default()),
            todo_count: 0,
            active: false,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Start accepting requests. Does not spawn anything until the first push.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stop, drain and release the worker pool.
    pub fn deactivate(&mut self) {
        self.clear();
        self.pool = None;
        self.todo_count = 0;
        self.active = false;
    }

    /// A worker pool exists.
    #[must_use]
    pub const fn running(&self) -> bool {
        self.pool.is_some()
    }

    /// Active and nothing left in flight.
    #[must_use]
    pub fn done(&self) -> bool {
        self.active && (self.pool.is_none() || self.todo_count == 0)
    }

    #[must_use]
    pub const fn todo_count(&self) -> usize {
        self.todo_count
    }

    fn ensure_running(&mut self) -> Option<&ThreadPool> {
        if self.pool.is_none() {
            match ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("preview-{i}"))
                .panic_handler(|_| {
                    warn!(
                        marker = "PREVIEW_WORKER_PANIC",
                        operation_type = "preview",
                        "Preview loader panicked"
                    );
                })
                .build()
            {
                Ok(pool) => {
                    self.pool = Some(pool);
                    self.todo_count = 0;
                }
                Err(err) => {
                    warn!(
                        marker = "PREVIEW_POOL_FAILED",
                        operation_type = "preview",
                        error = %err,
                        "Could not start preview workers"
                    );
                    return None;
                }
            }
        }
        self.pool.as_ref()
    }

    /// Whether an entry of this kind could ever get a preview.
    #[must_use]
    pub fn wants_preview(entry: &DisplayEntry) -> bool {
        entry.preview.is_none()
            && !entry
                .flags
                .intersects(EntryFlags::INVALID_PREVIEW | EntryFlags::PREVIEW_LOADING)
            && entry.typeflag.intersects(TypeFlags::PREVIEWABLE)
            && !(entry.typeflag.contains(TypeFlags::BLENDERLIB)
                && entry.flags.contains(EntryFlags::BLENDERLIB_NO_PREVIEW))
    }

    /// Request a preview for `entry` at filtered `index`. No-op unless the
    /// pipeline is active and the entry qualifies. Returns whether a task
    /// was queued.
    pub fn push(&mut self, entry: &mut DisplayEntry, index: usize, root: &Path) -> bool {
        if !self.active || !Self::wants_preview(entry) {
            return false;
        }

        let path: PathBuf = entry
            .redirection_path
            .clone()
            .unwrap_or_else(|| root.join(entry.relpath.as_str()));
        let source = ThumbSource::from_typeflag(entry.typeflag);
        let offline = entry.attributes.contains(FileAttributes::OFFLINE);
        let uid = entry.uid;

        let loader = Arc::clone(&self.loader);
        let shared = Arc::clone(&self.shared);
        let done_tx = self.done_tx.clone();
        let generation = shared.generation.load(Ordering::Acquire);

        let Some(pool) = self.ensure_running() else {
            return false;
        };

        *shared.in_flight.lock() += 1;
        pool.spawn(move || {
            let mut guard = TaskGuard {
                shared,
                done_tx,
                loading: None,
            };
            if guard.shared.generation.load(Ordering::Acquire) == generation {
                guard.loading = Some((index, uid));
                let preview = match loader.load(&path, source, offline) {
                    Ok(preview) => preview,
                    Err(err) => {
                        debug!(
                            marker = "PREVIEW_LOAD_FAILED",
                            operation_type = "preview",
                            path = %path.display(),
                            error = %err,
                            "Preview load failed"
                        );
                        None
                    }
                };
                guard.loading = None;
                // The receiver lives as long as the pipeline.
                let _ = guard.done_tx.send(PreviewResult { index, uid, preview });
            }
        });

        entry.flags |= EntryFlags::PREVIEW_LOADING;
        self.todo_count += 1;
        true
    }

    /// Skip queued tasks, wait for running ones, drop every result.
    #[instrument(level = "debug", skip(self), fields(todo = self.todo_count))]
    pub fn clear(&mut self) {
        if self.pool.is_none() {
            return;
        }

        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.wait_idle();

        let discarded = self.done_rx.try_iter().count();
        self.todo_count = 0;
        debug!(
            marker = "PREVIEW_QUEUE_CLEARED",
            operation_type = "preview",
            discarded = discarded,
            "Preview queue cleared"
        );
    }

    /// Move finished previews into their cache entries. Entries that left
    /// the cache in the meantime are not re-created. Returns whether any
    /// preview was assigned.
    pub fn update(&mut self, cache: &mut EntryCache) -> bool {
        if self.pool.is_none() {
            return false;
        }

        let mut changed = false;
        while let Ok(result) = self.done_rx.try_recv() {
            self.todo_count = self.todo_count.saturating_sub(1);

            let Some(entry) = cache.get_mut(result.index) else {
                continue;
            };
            if entry.uid != result.uid {
                continue;
            }

            match result.preview {
                Some(preview) => {
                    entry.preview = Some(preview);
                    changed = true;
                }
                // Not retried until the entry leaves the cache.
                None => entry.flags |= EntryFlags::INVALID_PREVIEW,
            }
            entry.flags.remove(EntryFlags::PREVIEW_LOADING);
        }
        changed
    }

    /// Block until every queued task has either run or been skipped.
    pub fn wait_idle(&self) {
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            self.shared.idle.wait(&mut in_flight);
        }
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        self.clear();
    }
}
