//! `src/report.rs`
//!
//! # `ReportList`: warnings and errors for the host to display
//!
//! The scanner and the preview workers never surface errors through return
//! values across threads; they push a [`Report`] here and carry on. The host
//! drains the list on its own schedule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub level: ReportLevel,
    pub message: CompactString,
    pub at: DateTime<Utc>,
}

/// Cheaply clonable handle; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct ReportList {
    inner: Arc<Mutex<Vec<Report>>>,
}

impl ReportList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: ReportLevel, message: impl Into<CompactString>) {
        let message: CompactString = message.into();

        match level {
            ReportLevel::Info => info!(marker = "REPORT_INFO", operation_type = "report", "{message}"),
            ReportLevel::Warning => {
                warn!(marker = "REPORT_WARNING", operation_type = "report", "{message}");
            }
            ReportLevel::Error => {
                error!(marker = "REPORT_ERROR", operation_type = "report", "{message}");
            }
        }

        self.inner.lock().push(Report {
            level,
            message,
            at: Utc::now(),
        });
    }

    pub fn warning(&self, message: impl Into<CompactString>) {
        self.push(ReportLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<CompactString>) {
        self.push(ReportLevel::Error, message);
    }

    /// Record a recoverable error as a warning, anything else as an error.
    pub fn core_error(&self, err: &CoreError) {
        let level = if err.is_recoverable() {
            ReportLevel::Warning
        } else {
            ReportLevel::Error
        };
        self.push(level, err.to_string());
    }

    /// Take every report, leaving the list empty.
    #[must_use]
    pub fn drain(&self) -> Vec<Report> {
        std::mem::take(&mut *self.inner.lock())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Report> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.inner
            .lock()
            .iter()
            .any(|report| report.level == ReportLevel::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let reports = ReportList::new();
        let shared = reports.clone();

        shared.warning("cannot read /nope");
        reports.error("library is corrupt");

        assert_eq!(reports.len(), 2);
        assert!(reports.has_errors());

        let drained = reports.drain();
        assert_eq!(drained[0].level, ReportLevel::Warning);
        assert_eq!(drained[1].message, "library is corrupt");
        assert!(shared.is_empty());
    }

    #[test]
    fn test_core_error_levels() {
        let reports = ReportList::new();
        reports.core_error(&CoreError::path_not_found("/x"));
        reports.core_error(&CoreError::Cancelled);

        let levels: Vec<ReportLevel> = reports.snapshot().iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![ReportLevel::Warning, ReportLevel::Error]);
    }
}
