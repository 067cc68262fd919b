//! Batched remote log sink.
//!
//! Entries accumulate in memory and are written to the remote store as one
//! newline-delimited JSON file per batch:
//!
//! ```text
//! /logs/log_20240611_142301_0007.jsonl
//! {"timestamp":"2024-06-11T14:23:01.120Z","level":"INFO","message":"compose started","metadata":{...}}
//! {"timestamp":"2024-06-11T14:23:02.874Z","level":"ERROR","message":"layer failed","metadata":{"index":"2"}}
//! ```
//!
//! ERROR entries are split out of each batch into a file of their own under
//! `error_folder` (default `/error_logs`), named the same way.
//!
//! A batch is written when the buffer reaches `batch_size` entries, when the
//! background [`FlushTimer`] fires, or on an explicit [`LogSink::flush`].
//! The buffer lock is only held to push or swap; the upload happens on the
//! detached batch with the lock released.
//!
//! [`LogSinkLayer`] bridges `tracing` events into the sink. Events emitted
//! on a thread that is currently flushing are dropped, so the upload's own
//! logging cannot feed back into the buffer.

use crate::config::LogSinkConfig;
use crate::remote::{self, RemoteError, RemotePath, RemoteStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

// =============================================================================
// Sink
// =============================================================================

thread_local! {
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is uploading a batch.
pub fn is_flushing() -> bool {
    FLUSHING.with(Cell::get)
}

struct FlushGuard;

impl FlushGuard {
    fn enter() -> Self {
        FLUSHING.with(|f| f.set(true));
        FlushGuard
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|f| f.set(false));
    }
}

struct Inner {
    buffer: Mutex<Vec<LogEntry>>,
    store: Arc<dyn RemoteStore>,
    batch_size: usize,
    folder: String,
    error_folder: String,
    flush_interval: Duration,
    sequence: AtomicU64,
}

/// Shared handle to the batched sink. Cloning is cheap.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl LogSink {
    pub fn new(store: Arc<dyn RemoteStore>, config: &LogSinkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
                store,
                batch_size: config.batch_size.max(1),
                folder: config.folder.clone(),
                error_folder: config.error_folder.clone(),
                flush_interval: config.flush_interval(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // A panic while holding the lock only ever leaves a valid Vec behind.
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry; reaching the batch size flushes immediately.
    pub fn add(&self, entry: LogEntry) -> Result<(), RemoteError> {
        let batch = {
            let mut buffer = self.buffer();
            buffer.push(entry);
            if buffer.len() < self.inner.batch_size {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };
        self.write_batch(batch).map(|_| ())
    }

    /// Write whatever is buffered. Returns the number of entries written;
    /// an empty buffer writes nothing.
    pub fn flush(&self) -> Result<usize, RemoteError> {
        let batch = self.take_batch();
        self.write_batch(batch)
    }

    /// Detach the current buffer contents.
    pub fn take_batch(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.buffer())
    }

    pub fn pending(&self) -> usize {
        self.buffer().len()
    }

    fn write_batch(&self, batch: Vec<LogEntry>) -> Result<usize, RemoteError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let _guard = FlushGuard::enter();

        let total = batch.len();
        let (errors, rest): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|e| e.level == LogLevel::Error);
        // Both files are attempted; the first failure is reported.
        let written = self.write_file(&self.inner.folder, &rest);
        let errors_written = self.write_file(&self.inner.error_folder, &errors);
        written.and(errors_written)?;
        Ok(total)
    }

    fn write_file(&self, folder: &str, entries: &[LogEntry]) -> Result<(), RemoteError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for entry in entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    body.push_str(&line);
                    body.push('\n');
                }
                Err(e) => eprintln!("log sink: cannot serialize entry: {e}"),
            }
        }

        let seq = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("log_{}_{:04}.jsonl", Utc::now().format("%Y%m%d_%H%M%S"), seq);
        let path = RemotePath::in_directory(folder, &name)?;
        remote::deliver(self.inner.store.as_ref(), &path, &mut body.as_bytes())?;
        Ok(())
    }

    /// Start the background timer that flushes every `flush_interval`.
    pub fn spawn_timer(&self) -> FlushTimer {
        let (cancel, rx) = mpsc::channel::<()>();
        let sink = self.clone();
        let interval = self.inner.flush_interval;
        let handle = std::thread::Builder::new()
            .name("log-sink-timer".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = sink.flush() {
                                eprintln!("log sink: timed flush failed: {e}");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });
        match handle {
            Ok(handle) => FlushTimer {
                cancel: Some(cancel),
                handle: Some(handle),
            },
            Err(e) => {
                eprintln!("log sink: cannot start flush timer: {e}");
                FlushTimer {
                    cancel: None,
                    handle: None,
                }
            }
        }
    }
}

/// Handle to the sink's background flush thread. Dropping it cancels the
/// timer and waits for the thread to exit.
pub struct FlushTimer {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// tracing bridge
// =============================================================================

/// `tracing` layer forwarding events at or above `min_level` into a sink.
pub struct LogSinkLayer {
    sink: LogSink,
    min_level: tracing::Level,
}

impl LogSinkLayer {
    pub fn new(sink: LogSink, min_level: tracing::Level) -> Self {
        Self { sink, min_level }
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Levels order by verbosity: ERROR < WARN < INFO < DEBUG < TRACE.
        if *meta.level() > self.min_level || is_flushing() {
            return;
        }
        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(meta.level().into(), visitor.message.unwrap_or_default());
        entry.metadata = visitor.fields;
        entry
            .metadata
            .insert("target".to_string(), meta.target().to_string());
        if let Err(e) = self.sink.add(entry) {
            eprintln!("log sink: batch upload failed: {e}");
        }
    }
}
