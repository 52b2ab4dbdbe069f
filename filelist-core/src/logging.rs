//! ``src/logging.rs``
//!
//! # Structured JSON logging
//!
//! Events carrying `marker` and `operation_type` fields are turned into
//! [`LogEntry`] records, batched through a bounded channel and written as
//! JSON lines to a rolling file. Scanner and preview threads only ever log;
//! nothing in the listing engine prints.

use std::{
    cell::RefCell,
    collections::HashMap,
    io::Write,
    path::{Component, Path, PathBuf},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{
    fs as TokioFs,
    sync::{Mutex, RwLock, mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    span::{self, Id as TraceId},
};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    layer::{Context as TracingContext, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const FIELD_MARKER: &str = "marker";
const FIELD_OPERATION_TYPE: &str = "operation_type";
const FIELD_DURATION: &str = "duration_us";
const FIELD_MESSAGE: &str = "message";
const SOURCE_UNKNOWN: &str = "UNKNOWN_SOURCE_LOCATION";

const MARKER_EVENT: &str = "EVENT";
const MARKER_ENTER_SPAN: &str = "ENTER_SPAN";
const MARKER_EXIT_SPAN: &str = "EXIT_SPAN_COMPLETE";
const OPERATION_UNKNOWN: &str = "unknown";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

// ------------------------------------------------------------
// Configuration
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,
    pub log_file_prefix: CompactString,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// `EnvFilter` directive, e.g. `info` or `filelist_core=debug`.
    pub log_level: CompactString,
    pub max_log_files: usize,
    pub max_field_size: usize,
    pub max_fields_count: usize,
    pub rotation: LogRotation,
    /// Mirror events to stderr in human-readable form.
    pub stderr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Self::NEVER,
            LogRotation::Daily => Self::DAILY,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: CompactString::const_new("filelist"),
            batch_size: 256,
            flush_interval: Duration::from_millis(25),
            log_level: CompactString::const_new("info"),
            max_log_files: 10,
            max_field_size: 2048,
            max_fields_count: 64,
            rotation: LogRotation::Daily,
            stderr: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logger already initialized")]
    AlreadyInitialized,

    #[error("Invalid log directory: {0}")]
    InvalidLogDirectory(String),

    #[error("Failed to create log directory: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown timeout")]
    ShutdownTimeout,
}

// ------------------------------------------------------------
// Records
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: CompactString,
    pub target: CompactString,
    pub marker: CompactString,
    pub operation_type: CompactString,
    pub source_location: CompactString,
    pub message: String,
    pub duration_us: Option<u64>,
    pub fields: HashMap<CompactString, String>,
}

static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl LogEntry {
    fn new(level: Level, target: &str, source_location: CompactString) -> Self {
        Self {
            sequence: LOG_SEQUENCE.fetch_add(1, Ordering::AcqRel),
            timestamp: Utc::now(),
            level: CompactString::const_new(level.as_str()),
            target: CompactString::new(target),
            marker: CompactString::const_new(MARKER_EVENT),
            operation_type: CompactString::const_new(OPERATION_UNKNOWN),
            source_location,
            message: String::new(),
            duration_us: None,
            fields: HashMap::new(),
        }
    }
}

fn source_location(file: Option<&str>, line: Option<u32>) -> CompactString {
    compact_str::format_compact!("{}:{}", file.unwrap_or(SOURCE_UNKNOWN), line.unwrap_or(0))
}

#[derive(Debug, Copy, Clone)]
struct VisitorLimits {
    max_fields_count: usize,
    max_field_size: usize,
}

impl From<&LoggerConfig> for VisitorLimits {
    fn from(config: &LoggerConfig) -> Self {
        Self {
            max_fields_count: config.max_fields_count,
            max_field_size: config.max_field_size,
        }
    }
}

// ------------------------------------------------------------
// Writer task
// ------------------------------------------------------------

pub struct LoggingSystem {
    sender: mpsc::Sender<LogEntry>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    visitor_limits: VisitorLimits,
}

impl LoggingSystem {
    async fn start(config: &LoggerConfig) -> Result<(Self, WorkerGuard)> {
        validate_config(config)?;
        setup_log_directory(&config.log_dir).await?;

        let file_appender = RollingFileAppender::builder()
            .rotation(config.rotation.into())
            .filename_prefix(config.log_file_prefix.as_str())
            .filename_suffix("jsonl")
            .max_log_files(config.max_log_files)
            .build(&config.log_dir)
            .context("Failed to create file appender")?;
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        let (log_tx, log_rx) = mpsc::channel::<LogEntry>(config.batch_size * 8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(write_task(
            log_rx,
            shutdown_rx,
            writer,
            config.batch_size,
            config.flush_interval,
        ));

        Ok((
            Self {
                sender: log_tx,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                task_handle: Mutex::new(Some(task_handle)),
                visitor_limits: VisitorLimits::from(config),
            },
            guard,
        ))
    }

    /// Queue an entry without blocking the emitting thread. A full channel
    /// drops INFO and below; warnings and errors wait for room on the
    /// runtime, or are dropped when the emitter has no runtime.
    fn dispatch(self: &Arc<Self>, entry: LogEntry, level: Level) {
        match self.sender.try_send(entry) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                if level > Level::WARN {
                    return;
                }
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let sender = self.sender.clone();
                    handle.spawn(async move {
                        let _ = sender.send(entry).await;
                    });
                }
            }
        }
    }

    async fn request_shutdown(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.lock().await.take() {
            time::timeout(SHUTDOWN_TIMEOUT, handle)
                .await
                .map_err(|_| LoggingError::ShutdownTimeout)?
                .context("Log writer task failed")?;
        }
        Ok(())
    }
}

async fn write_task(
    mut log_rx: mpsc::Receiver<LogEntry>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut writer: NonBlocking,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut buf = Vec::with_capacity(batch_size * 512);
    let mut interval = time::interval(flush_interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                // Drain what is already queued before leaving.
                while let Ok(entry) = log_rx.try_recv() {
                    batch.push(entry);
                }
                flush_batch(&mut batch, &mut writer, &mut buf);
                return;
            }
            entry = log_rx.recv() => {
                let Some(entry) = entry else {
                    flush_batch(&mut batch, &mut writer, &mut buf);
                    return;
                };
                batch.push(entry);
                if batch.len() >= batch_size {
                    flush_batch(&mut batch, &mut writer, &mut buf);
                }
            }
            _ = interval.tick() => flush_batch(&mut batch, &mut writer, &mut buf),
        }
    }
}

fn flush_batch(batch: &mut Vec<LogEntry>, writer: &mut NonBlocking, buf: &mut Vec<u8>) {
    if batch.is_empty() {
        return;
    }
    buf.clear();
    for entry in batch.drain(..) {
        if serde_json::to_writer(&mut *buf, &entry).is_ok() {
            buf.push(b'\n');
        }
    }
    let _ = writer.write_all(buf);
    let _ = writer.flush();
}

static LOGGING_SYSTEM: RwLock<Option<Arc<LoggingSystem>>> = RwLock::const_new(None);

// ------------------------------------------------------------
// Builder
// ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LoggerBuilder {
    config: LoggerConfig,
}

impl LoggerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        self.config.log_level = CompactString::new(level);
        self
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: bool) -> Self {
        self.config.stderr = stderr;
        self
    }

    /// Install the global subscriber. Keep the returned guard alive for as
    /// long as log lines should reach the file.
    pub async fn build(self) -> Result<WorkerGuard> {
        let mut system_guard = LOGGING_SYSTEM.write().await;
        if system_guard.is_some() {
            return Err(LoggingError::AlreadyInitialized.into());
        }

        let (system, guard) = LoggingSystem::start(&self.config).await?;
        let system = Arc::new(system);

        let level = self.config.log_level.clone();
        let make_filter = || -> Result<EnvFilter> {
            Ok(EnvFilter::from_default_env()
                .add_directive(Directive::from_str(&level).context("Invalid log level in config")?))
        };

        let json_layer = JsonLayer::new(system.clone()).with_filter(make_filter()?);
        let stderr_layer = if self.config.stderr {
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(make_filter()?),
            )
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(json_layer)
            .with(stderr_layer)
            .try_init()
            .context("Failed to install global tracing subscriber")?;

        *system_guard = Some(system);
        Ok(guard)
    }
}

// ------------------------------------------------------------
// Layer
// ------------------------------------------------------------

#[derive(Debug)]
struct SpanData {
    start_time: Instant,
    level: Level,
    target: CompactString,
    source_location: CompactString,
    operation_type: CompactString,
    fields: HashMap<CompactString, String>,
}

/// Fields recorded when the span was created.
#[derive(Default)]
struct SpanFieldMap(HashMap<CompactString, String>);

pub struct JsonLayer {
    system: Arc<LoggingSystem>,
    span_storage: DashMap<TraceId, SpanData>,
}

impl JsonLayer {
    #[must_use]
    pub fn new(system: Arc<LoggingSystem>) -> Self {
        Self {
            system,
            span_storage: DashMap::new(),
        }
    }

    /// Span enter/exit records are only written for INFO and more severe.
    fn records_spans(level: Level) -> bool {
        level <= Level::INFO
    }

    fn emit_span_record(&self, marker: &'static str, span: &SpanData, with_duration: bool) {
        let mut entry = LogEntry::new(span.level, &span.target, span.source_location.clone());
        entry.marker = CompactString::const_new(marker);
        entry.operation_type.clone_from(&span.operation_type);
        entry.fields.clone_from(&span.fields);
        if with_duration {
            entry.duration_us = Some(span.start_time.elapsed().as_micros() as u64);
        }
        entry.message = format!("Span {marker} {}", span.operation_type);
        self.system.dispatch(entry, span.level);
    }
}

impl<S> Layer<S> for JsonLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: TracingContext<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut visitor = JsonVisitor::pooled(self.system.visitor_limits);
            attrs.record(&mut visitor);
            span.extensions_mut()
                .insert(SpanFieldMap(std::mem::take(&mut visitor.fields)));
            visitor.release();
        }
    }

    fn on_enter(&self, id: &TraceId, ctx: TracingContext<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let metadata = span.metadata();
        let level = *metadata.level();
        if !Self::records_spans(level) {
            return;
        }

        let fields = span
            .extensions()
            .get::<SpanFieldMap>()
            .map(|map| map.0.clone())
            .unwrap_or_default();
        let operation_type = fields
            .get(FIELD_OPERATION_TYPE)
            .map_or_else(|| CompactString::const_new(OPERATION_UNKNOWN), CompactString::new);

        let data = SpanData {
            start_time: Instant::now(),
            level,
            target: CompactString::new(metadata.target()),
            source_location: source_location(metadata.file(), metadata.line()),
            operation_type,
            fields,
        };
        self.emit_span_record(MARKER_ENTER_SPAN, &data, false);
        self.span_storage.insert(id.clone(), data);
    }

    fn on_exit(&self, id: &TraceId, _ctx: TracingContext<'_, S>) {
        if let Some((_, data)) = self.span_storage.remove(id) {
            self.emit_span_record(MARKER_EXIT_SPAN, &data, true);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: TracingContext<'_, S>) {
        let meta = event.metadata();
        let level = *meta.level();

        let mut visitor = JsonVisitor::pooled(self.system.visitor_limits);
        event.record(&mut visitor);

        let mut entry = LogEntry::new(level, meta.target(), source_location(meta.file(), meta.line()));
        if let Some(marker) = visitor.fields.get(FIELD_MARKER) {
            entry.marker = CompactString::new(marker);
        }
        match visitor.fields.get(FIELD_OPERATION_TYPE) {
            Some(operation) => entry.operation_type = CompactString::new(operation),
            // Inherit from the enclosing span.
            None => {
                if let Some(span) = ctx.lookup_current()
                    && let Some(data) = self.span_storage.get(&span.id())
                {
                    entry.operation_type.clone_from(&data.operation_type);
                }
            }
        }
        entry.duration_us = visitor
            .fields
            .get(FIELD_DURATION)
            .and_then(|value| value.parse().ok());
        entry.message = std::mem::take(&mut visitor.message);
        entry.fields = std::mem::take(&mut visitor.fields);
        visitor.release();

        self.system.dispatch(entry, level);
    }

    fn on_close(&self, id: TraceId, _ctx: TracingContext<'_, S>) {
        self.span_storage.remove(&id);
    }
}

// ------------------------------------------------------------
// Field visitor
// ------------------------------------------------------------

thread_local! {
    static VISITOR_POOL: RefCell<Vec<JsonVisitor>> = const { RefCell::new(Vec::new()) };
}

struct JsonVisitor {
    message: String,
    fields: HashMap<CompactString, String>,
    limits: VisitorLimits,
}

impl JsonVisitor {
    fn pooled(limits: VisitorLimits) -> Self {
        VISITOR_POOL.with(|pool| match pool.borrow_mut().pop() {
            Some(mut visitor) => {
                visitor.message.clear();
                visitor.fields.clear();
                visitor.limits = limits;
                visitor
            }
            None => Self {
                message: String::with_capacity(256),
                fields: HashMap::with_capacity(16),
                limits,
            },
        })
    }

    fn release(self) {
        VISITOR_POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < 8 {
                pool.push(self);
            }
        });
    }

    fn add_field(&mut self, name: &str, mut value: String) {
        if self.fields.len() >= self.limits.max_fields_count {
            return;
        }
        if value.len() > self.limits.max_field_size {
            value = value.chars().take(self.limits.max_field_size).collect();
        }
        self.fields.insert(CompactString::new(name), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == FIELD_MESSAGE {
            self.message = format!("{value:?}");
        } else {
            self.add_field(field.name(), format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == FIELD_MESSAGE {
            self.message = value.to_string();
        } else {
            self.add_field(field.name(), value.to_string());
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.add_field(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.add_field(field.name(), value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.add_field(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.add_field(field.name(), value.to_string());
    }
}

// ------------------------------------------------------------
// Setup helpers
// ------------------------------------------------------------

/// Flush pending records and stop the writer task.
pub async fn shutdown_logging() -> Result<()> {
    let system = LOGGING_SYSTEM.write().await.take();
    if let Some(system) = system {
        system.request_shutdown().await?;
    }
    Ok(())
}

fn validate_config(config: &LoggerConfig) -> Result<(), LoggingError> {
    if config.batch_size == 0 {
        return Err(LoggingError::ConfigError("Batch size must be greater than 0".into()));
    }
    if config.flush_interval.is_zero() {
        return Err(LoggingError::ConfigError("Flush interval must be greater than 0".into()));
    }
    if config.max_field_size == 0 {
        return Err(LoggingError::ConfigError("Max field size must be greater than 0".into()));
    }
    validate_log_directory(&config.log_dir)
}

fn validate_log_directory(path: &Path) -> Result<(), LoggingError> {
    if path.components().next().is_none() {
        return Err(LoggingError::InvalidLogDirectory("Empty path".into()));
    }
    if path.components().any(|component| component == Component::ParentDir) {
        return Err(LoggingError::InvalidLogDirectory(
            "Path contains parent directory references".into(),
        ));
    }
    Ok(())
}

async fn setup_log_directory(log_dir: &Path) -> Result<(), LoggingError> {
    TokioFs::create_dir_all(log_dir).await?;
    Ok(())
}

pub async fn init_default_logging() -> Result<WorkerGuard> {
    LoggerBuilder::new().build().await
}

pub async fn init_logging_with_level(level: &str) -> Result<WorkerGuard> {
    LoggerBuilder::new().with_level(level).build().await
}

pub async fn init_logging_with_config(config: LoggerConfig) -> Result<WorkerGuard> {
    LoggerBuilder::new().with_config(config).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&LoggerConfig::default()).is_ok());

        let config = LoggerConfig {
            batch_size: 0,
            ..LoggerConfig::default()
        };
        assert!(matches!(validate_config(&config), Err(LoggingError::ConfigError(_))));

        let config = LoggerConfig {
            flush_interval: Duration::ZERO,
            ..LoggerConfig::default()
        };
        assert!(matches!(validate_config(&config), Err(LoggingError::ConfigError(_))));
    }

    #[test]
    fn test_validate_log_directory() {
        assert!(validate_log_directory(Path::new("logs")).is_ok());
        assert!(matches!(
            validate_log_directory(Path::new("")),
            Err(LoggingError::InvalidLogDirectory(_))
        ));
        assert!(matches!(
            validate_log_directory(Path::new("logs/../../etc")),
            Err(LoggingError::InvalidLogDirectory(_))
        ));
    }

    #[test]
    fn test_logger_config_from_toml() {
        let config: LoggerConfig =
            toml::from_str("flush_interval = \"100ms\"\nrotation = \"never\"\nstderr = true\n").unwrap();
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.rotation, LogRotation::Never);
        assert!(config.stderr);
        assert_eq!(config.batch_size, LoggerConfig::default().batch_size);
    }

    #[test]
    fn test_visitor_truncates_and_caps_fields() {
        let mut visitor = JsonVisitor::pooled(VisitorLimits {
            max_fields_count: 2,
            max_field_size: 4,
        });
        visitor.add_field("a", "abcdefgh".into());
        visitor.add_field("b", "xy".into());
        visitor.add_field("c", "ignored".into());

        assert_eq!(visitor.fields.len(), 2);
        assert_eq!(visitor.fields.get("a").map(String::as_str), Some("abcd"));
        assert!(!visitor.fields.contains_key("c"));
        visitor.release();
    }

    #[tokio::test]
    async fn test_builder_writes_jsonl_and_rejects_second_install() {
        let tmp = TempDir::new().unwrap();
        let config = LoggerConfig {
            log_dir: tmp.path().to_path_buf(),
            rotation: LogRotation::Never,
            ..LoggerConfig::default()
        };

        let guard = LoggerBuilder::new().with_config(config.clone()).build().await.unwrap();
        tracing::info!(marker = "LOGGING_TEST", operation_type = "test", "hello");

        let second = LoggerBuilder::new().with_config(config).build().await;
        assert!(second.is_err());

        shutdown_logging().await.unwrap();
        drop(guard);

        let mut contents = String::new();
        for file in std::fs::read_dir(tmp.path()).unwrap() {
            let path = file.unwrap().path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                contents.push_str(&std::fs::read_to_string(path).unwrap());
            }
        }
        let entry = contents
            .lines()
            .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
            .find(|entry| entry.marker == "LOGGING_TEST")
            .unwrap();
        assert_eq!(entry.operation_type, "test");
        assert_eq!(entry.message, "hello");
        assert_eq!(entry.level, "INFO");
    }
}
