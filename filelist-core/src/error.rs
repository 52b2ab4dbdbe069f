//! `src/error.rs`
//! ============================================================================
//! # `CoreError`: unified error type for the listing engine
//!
//! • Stack-friendly payloads (`CompactString`, `SmallVec`)
//! • One `tracing` event per error via [`CoreError::trace`]
//! • `#[non_exhaustive]` so variants can be added without breaking callers
//!
//! Scanner and preview threads never hand these across the thread boundary;
//! they end up in the report list instead. Consumer-side operations return
//! [`CoreResult`].

use std::io::{self, ErrorKind};

use compact_str::{CompactString, ToCompactString};
use smallvec::{SmallVec, smallvec};
use thiserror::Error;
use tracing::{Level, event};

/// Convenient alias carrying our unified error type
pub type CoreResult<T> = Result<T, CoreError>;

/// Primary error enumeration (grouped by concern)
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CoreError {
    // ────────────────────────────────────────────────────────────
    // Input validation
    // ────────────────────────────────────────────────────────────
    #[error("Invalid input: {field} - {message}")]
    InvalidInput {
        field: CompactString,
        message: CompactString,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: CompactString },

    // ────────────────────────────────────────────────────────────
    // Path-related failures
    // ────────────────────────────────────────────────────────────
    #[error("Path not found: {0}")]
    PathNotFound(CompactString),

    #[error("Path access denied: {0}")]
    PathAccessDenied(CompactString),

    #[error("Not a directory or library: {0}")]
    NotADirectory(CompactString),

    // ────────────────────────────────────────────────────────────
    // Library files
    // ────────────────────────────────────────────────────────────
    #[error("Cannot open library {path}: {reason}")]
    LibraryOpen {
        path: CompactString,
        reason: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // File-system
    // ────────────────────────────────────────────────────────────
    #[error("FS operation failed: {kind:?}")]
    FileSystem {
        kind: ErrorKind,
        #[source]
        source: Box<io::Error>,
    },

    #[error("Metadata error: {path} - {kind:?}")]
    Metadata {
        path: CompactString,
        kind: ErrorKind,
    },

    // ────────────────────────────────────────────────────────────
    // Parsing (metadata pages, catalog definitions, config)
    // ────────────────────────────────────────────────────────────
    #[error("Parse error: {input} - expected {expected}")]
    ParseError {
        input: CompactString,
        expected: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Background work
    // ────────────────────────────────────────────────────────────
    #[error("Task {task} failed: {reason}")]
    TaskFailed {
        task: CompactString,
        reason: CompactString,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    // ------------------------------------------------------------
    // Previews
    // ------------------------------------------------------------
    #[error("Preview failed for {path}: {reason}")]
    Preview {
        path: CompactString,
        reason: CompactString,
    },

    // ------------------------------------------------------------
    // Remote libraries
    // ------------------------------------------------------------
    #[error("Remote request for {url} failed: {reason}")]
    RemoteRequest {
        url: CompactString,
        reason: CompactString,
    },

    /// Caching layer error.
    #[error("Cache error: {0}")]
    Cache(CompactString),

    /// Any other error, with description.
    #[error("Unexpected error: {0}")]
    Other(CompactString),
}

// ────────────────────────────────────────────────────────────────────────────
// Fast classification helpers
// ────────────────────────────────────────────────────────────────────────────
impl CoreError {
    /// Whether the listing can carry on after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_)
                | Self::PathAccessDenied(_)
                | Self::LibraryOpen { .. }
                | Self::Metadata { .. }
                | Self::ParseError { .. }
                | Self::Preview { .. }
                | Self::RemoteRequest { .. }
        )
    }

    /// Decide if an automated retry is sensible
    #[inline]
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(
            self,
            Self::RemoteRequest { .. }
                | Self::FileSystem {
                    kind: ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock,
                    ..
                }
        )
    }

    // ────────────────────────────────────────────────────────────
    // Attribute helpers – used for JSON log grouping
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    pub const fn operation_type(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "input_validation",
            Self::InvalidState { .. } => "invalid_state",
            Self::PathNotFound(_) | Self::PathAccessDenied(_) | Self::NotADirectory(_) => {
                "path_access"
            }
            Self::LibraryOpen { .. } => "library_read",
            Self::FileSystem { .. } | Self::Metadata { .. } => "file_system",
            Self::ParseError { .. } => "data_parsing",
            Self::TaskFailed { .. } | Self::Cancelled => "task_management",
            Self::Preview { .. } => "preview",
            Self::RemoteRequest { .. } => "remote_library",
            Self::Cache(_) => "cache",
            Self::Other(_) => "unknown_error",
        }
    }

    // ────────────────────────────────────────────────────────────
    // Structured-field extraction (SmallVec avoids heap ≤4 items)
    // ────────────────────────────────────────────────────────────
    #[must_use]
    pub fn extract_trace_fields(&self) -> SmallVec<[(&'static str, CompactString); 4]> {
        match self {
            Self::InvalidInput { field, message } => {
                smallvec![("field", field.clone()), ("message", message.clone())]
            }

            Self::PathNotFound(path) | Self::NotADirectory(path) => smallvec![("path", path.clone())],

            Self::LibraryOpen { path, reason } | Self::Preview { path, reason } => {
                smallvec![("path", path.clone()), ("reason", reason.clone())]
            }

            Self::TaskFailed { task, reason } => {
                smallvec![("task", task.clone()), ("reason", reason.clone())]
            }

            Self::RemoteRequest { url, reason } => {
                smallvec![("url", url.clone()), ("reason", reason.clone())]
            }

            Self::FileSystem { kind, .. } => {
                smallvec![("error_kind", format!("{kind:?}").to_compact_string())]
            }

            _ => smallvec![],
        }
    }

    // ────────────────────────────────────────────────────────────
    // Single-call JSON-layer emission
    // ────────────────────────────────────────────────────────────
    #[must_use]
    pub fn trace(self) -> Self {
        let extra: SmallVec<[(&'static str, CompactString); 4]> = self.extract_trace_fields();

        event!(
            Level::ERROR,
            marker = self.error_marker(),
            operation_type = self.operation_type(),
            error = %self,
            recoverable = self.is_recoverable(),
            retry = self.should_retry(),
            extra_len = extra.len(),
            extra = ?extra,
        );

        self
    }

    // ────────────────────────────────────────────────────────────
    // Lightweight smart-constructors
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    pub fn invalid_input(field: &str, message: &str) -> Self {
        Self::InvalidInput {
            field: CompactString::new(field),
            message: CompactString::new(message),
        }
    }

    #[inline]
    #[must_use]
    pub fn invalid_state(message: &str) -> Self {
        Self::InvalidState {
            message: CompactString::new(message),
        }
    }

    #[inline]
    #[must_use]
    pub fn path_not_found(path: &str) -> Self {
        Self::PathNotFound(CompactString::new(path))
    }

    #[inline]
    #[must_use]
    pub fn not_a_directory(path: &str) -> Self {
        Self::NotADirectory(CompactString::new(path))
    }

    #[inline]
    #[must_use]
    pub fn library_open(path: &str, reason: &str) -> Self {
        Self::LibraryOpen {
            path: CompactString::new(path),
            reason: CompactString::new(reason),
        }
    }

    #[inline]
    #[must_use]
    pub fn parse_error(input: &str, expected: &str) -> Self {
        Self::ParseError {
            input: CompactString::new(input),
            expected: CompactString::new(expected),
        }
    }

    #[inline]
    #[must_use]
    pub fn task_failed(task: &str, reason: &str) -> Self {
        Self::TaskFailed {
            task: CompactString::new(task),
            reason: CompactString::new(reason),
        }
    }

    #[inline]
    #[must_use]
    pub fn preview(path: &str, reason: &str) -> Self {
        Self::Preview {
            path: CompactString::new(path),
            reason: CompactString::new(reason),
        }
    }

    #[inline]
    #[must_use]
    pub fn remote_request(url: &str, reason: &str) -> Self {
        Self::RemoteRequest {
            url: CompactString::new(url),
            reason: CompactString::new(reason),
        }
    }

    // ────────────────────────────────────────────────────────────
    // Internal marker generator – keeps log keys stable
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    pub const fn error_marker(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "ERROR_INPUT_VALIDATION",
            Self::InvalidState { .. } => "ERROR_INVALID_STATE",
            Self::PathNotFound(_) => "ERROR_PATH_NOT_FOUND",
            Self::PathAccessDenied(_) => "ERROR_PATH_ACCESS_DENIED",
            Self::NotADirectory(_) => "ERROR_NOT_A_DIRECTORY",
            Self::LibraryOpen { .. } => "ERROR_LIBRARY_OPEN",
            Self::FileSystem { .. } => "ERROR_FILE_SYSTEM",
            Self::Metadata { .. } => "ERROR_METADATA",
            Self::ParseError { .. } => "ERROR_PARSE_FAILED",
            Self::TaskFailed { .. } => "ERROR_TASK_FAILED",
            Self::Cancelled => "ERROR_CANCELLED",
            Self::Preview { .. } => "ERROR_PREVIEW",
            Self::RemoteRequest { .. } => "ERROR_REMOTE_REQUEST",
            Self::Cache(_) => "ERROR_CACHE",
            Self::Other(_) => "ERROR_UNKNOWN",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loss-free mapping from std::io::Error
// ────────────────────────────────────────────────────────────────────────────
impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::PermissionDenied => Self::PathAccessDenied(err.to_compact_string()),
            kind => Self::FileSystem {
                kind,
                source: Box::new(err),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            input: err.to_compact_string(),
            expected: CompactString::const_new("valid JSON document"),
        }
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError {
            input: err.to_compact_string(),
            expected: CompactString::const_new("valid TOML configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: CoreError = io::Error::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, CoreError::FileSystem { kind: ErrorKind::NotFound, .. }));
        assert_eq!(err.operation_type(), "file_system");

        let denied: CoreError = io::Error::new(ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(denied, CoreError::PathAccessDenied(_)));
        assert!(denied.is_recoverable());
    }

    #[test]
    fn test_classification() {
        let err = CoreError::remote_request("https://example.org/lib", "timeout");
        assert!(err.should_retry());
        assert_eq!(err.error_marker(), "ERROR_REMOTE_REQUEST");
        assert_eq!(err.extract_trace_fields().len(), 2);

        assert!(!CoreError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_trace_returns_self() {
        let err = CoreError::path_not_found("/missing").trace();
        assert_eq!(err.to_string(), "Path not found: /missing");
    }
}
