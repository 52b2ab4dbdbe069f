//! `src/remote/status.rs`
//! ============================================================================
//! # Remote library status tracker
//!
//! Per-URL loading state for asset libraries fetched by an external
//! downloader. The downloader pings the tracker; the read job polls it.
//!
//! `Loading` is the only state that accepts pings. `Finished`, `Failure`
//! and `Cancelled` are terminal until the next [`RemoteLibraryStatusTracker::begin_loading`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use compact_str::CompactString;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

pub const TIMEOUT_MESSAGE: &str = "Timed out while waiting for the remote asset library";

/// Time source for the tracker, in seconds since an arbitrary origin.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, at: Duration) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Loading,
    Finished,
    Failure,
    Cancelled,
}

impl RemoteStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLibraryStatus {
    pub status: RemoteStatus,
    pub timeout: Duration,
    pub last_updated_at: Duration,
    pub last_timeout_check_at: Duration,
    pub last_new_pages_at: Option<Duration>,
    pub metafiles_in_place: bool,
    pub failure_message: Option<CompactString>,
}

impl RemoteLibraryStatus {
    fn loading(timeout: Duration, now: Duration) -> Self {
        Self {
            status: RemoteStatus::Loading,
            timeout,
            last_updated_at: now,
            last_timeout_check_at: now,
            last_new_pages_at: None,
            metafiles_in_place: false,
            failure_message: None,
        }
    }

    fn reset_timeout(&mut self, now: Duration) {
        self.last_updated_at = now;
        self.last_timeout_check_at = now;
    }
}

/// Process-scoped map from library URL to its loading status.
#[derive(Debug)]
pub struct RemoteLibraryStatusTracker {
    clock: Arc<dyn Clock>,
    statuses: Mutex<HashMap<CompactString, RemoteLibraryStatus>>,
}

impl Default for RemoteLibraryStatusTracker {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::default()))
    }
}

impl RemoteLibraryStatusTracker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            statuses: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Start (or restart) a loading session for `url`.
    pub fn begin_loading(&self, url: &str, timeout: Duration) -> CoreResult<()> {
        if timeout.is_zero() {
            return Err(CoreError::invalid_input("timeout", "must be greater than zero"));
        }
        let now = self.clock.now();
        self.statuses
            .lock()
            .insert(CompactString::from(url), RemoteLibraryStatus::loading(timeout, now));
        info!(
            marker = "REMOTE_LIBRARY_LOADING",
            operation_type = "remote_status",
            url = url,
            timeout_s = timeout.as_secs_f64(),
            "Remote library loading started"
        );
        Ok(())
    }

    /// Apply `update` only while `url` is loading. Returns whether it ran.
    fn with_loading(&self, url: &str, update: impl FnOnce(&mut RemoteLibraryStatus, Duration)) -> bool {
        let now = self.clock.now();
        let mut statuses = self.statuses.lock();
        match statuses.get_mut(url) {
            Some(status) if status.status == RemoteStatus::Loading => {
                update(status, now);
                true
            }
            _ => false,
        }
    }

    pub fn ping_still_loading(&self, url: &str) -> bool {
        self.with_loading(url, |status, now| status.reset_timeout(now))
    }

    pub fn ping_new_pages(&self, url: &str) -> bool {
        self.with_loading(url, |status, now| {
            status.reset_timeout(now);
            status.last_new_pages_at = Some(now);
        })
    }

    /// Recorded in any state: the flag is read after loading completed too.
    pub fn ping_metafiles_in_place(&self, url: &str) -> bool {
        self.statuses
            .lock()
            .get_mut(url)
            .map(|status| status.metafiles_in_place = true)
            .is_some()
    }

    pub fn set_finished(&self, url: &str) -> bool {
        let changed = self.with_loading(url, |status, now| {
            status.status = RemoteStatus::Finished;
            status.reset_timeout(now);
        });
        if changed {
            info!(
                marker = "REMOTE_LIBRARY_FINISHED",
                operation_type = "remote_status",
                url = url,
                "Remote library loaded"
            );
        }
        changed
    }

    pub fn set_failure(&self, url: &str, message: &str) -> bool {
        let changed = self.with_loading(url, |status, now| {
            status.status = RemoteStatus::Failure;
            status.failure_message = Some(CompactString::from(message));
            status.reset_timeout(now);
        });
        if changed {
            warn!(
                marker = "REMOTE_LIBRARY_FAILED",
                operation_type = "remote_status",
                url = url,
                reason = message,
                "Remote library loading failed"
            );
        }
        changed
    }

    pub fn set_cancelled(&self, url: &str) -> bool {
        self.with_loading(url, |status, now| {
            status.status = RemoteStatus::Cancelled;
            status.reset_timeout(now);
        })
    }

    /// Fail `url` when nothing was heard from the downloader for longer than
    /// its timeout. Evaluated at most once per `0.9 * timeout`, so calling it
    /// every frame is fine. Returns `true` when this call timed it out.
    pub fn handle_timeout(&self, url: &str) -> bool {
        let now = self.clock.now();
        let mut statuses = self.statuses.lock();
        let Some(status) = statuses.get_mut(url) else {
            return false;
        };
        if status.status != RemoteStatus::Loading {
            return false;
        }

        let since_check = now.saturating_sub(status.last_timeout_check_at);
        if since_check < status.timeout.mul_f64(0.9) {
            return false;
        }
        status.last_timeout_check_at = now;

        if now.saturating_sub(status.last_updated_at) <= status.timeout {
            return false;
        }

        status.status = RemoteStatus::Failure;
        status.failure_message = Some(CompactString::const_new(TIMEOUT_MESSAGE));
        warn!(
            marker = "REMOTE_LIBRARY_TIMEOUT",
            operation_type = "remote_status",
            url = url,
            timeout_s = status.timeout.as_secs_f64(),
            "Remote library timed out"
        );
        true
    }

    #[must_use]
    pub fn status(&self, url: &str) -> Option<RemoteStatus> {
        self.statuses.lock().get(url).map(|status| status.status)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<RemoteLibraryStatus> {
        self.statuses.lock().get(url).cloned()
    }

    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.status(url) == Some(RemoteStatus::Loading)
    }

    pub fn forget(&self, url: &str) -> bool {
        self.statuses.lock().remove(url).is_some()
    }
}
