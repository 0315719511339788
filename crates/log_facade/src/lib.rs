//! `log_facade` provides a dual-output leveled logging facade based on the [`tracing`]
//! ecosystem.
//!
//! It offers:
//! - A [`Logger`] facade owning its own (non-global) `tracing` dispatcher, so multiple
//!   independently configured loggers can coexist in one process.
//! - Optional dual output: an append-only trace file receiving every enabled level, with
//!   info-and-above additionally mirrored to standard error.
//! - Child-logger derivation ([`Logger::child`], [`Logger::child_with_prefix`]) sharing the
//!   parent's destinations and minimum level.
//! - A trace-gated, panic-safe indented-JSON renderer ([`Logger::trace_json`]) for verbose
//!   diagnostics.
//!
//! Output uses a fixed plain-text layout, `<time> [<level>] <prefix><message>`, with
//! multi-line message bodies indented to align under the first line (see
//! [`PlainFormattingLayer`]).

mod formatter;

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::Write,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::{Dispatch, Level};
use tracing_subscriber::{
    Layer, Registry, filter::LevelFilter, fmt::MakeWriter, layer::SubscriberExt,
};

pub use self::formatter::PlainFormattingLayer;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Errors that can occur while constructing a [`Logger`].
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// The trace log file could not be opened for appending.
    #[error("unable to open trace log file `{}`: {source}", .path.display())]
    TraceFileOpen {
        /// The path that failed to open.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A leveled logging facade wrapping an owned [`tracing`] dispatcher.
///
/// The facade composes rather than extends the underlying logger: destinations and the minimum
/// level live behind a shared core, and the forwarded surface is the explicit set of methods
/// below. Children derived via [`Logger::child`] or [`Logger::child_with_prefix`] share the
/// core; each instance carries only its own prefix.
///
/// The trace-file handle (when configured) is owned by the dispatcher's file layer and is
/// released when the last facade sharing it is dropped; in typical use that is process exit.
#[derive(Debug)]
pub struct Logger {
    core: Arc<LoggerCore>,
    prefix: String,
}

#[derive(Debug)]
struct LoggerCore {
    dispatch: Dispatch,
    level: Level,
}

impl Logger {
    /// Constructs a logger from the two verbosity flags and an optional trace file.
    ///
    /// The minimum level defaults to `INFO`; `debug` lowers it to `DEBUG` and `trace` lowers it
    /// to `TRACE` (`trace` wins when both are set). One informational line announcing the trace
    /// file path (empty when none) is written to standard error during construction.
    ///
    /// When `trace_file` is given, it is opened for appending (created with mode `0o666` on
    /// Unix, subject to the process umask) and output is routed per level: trace and debug
    /// messages go to the file only, while info and above go to both the file and standard
    /// error. If the file turns out to be the standard-error stream itself (say,
    /// `/dev/stderr`), no routing is installed, so lines are not duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::TraceFileOpen`] if the trace file cannot be opened. The caller
    /// decides whether that is fatal; an unusable trace file usually is.
    pub fn new(debug: bool, trace: bool, trace_file: Option<&Path>) -> Result<Self, LoggerError> {
        Self::with_stderr_writer(debug, trace, trace_file, std::io::stderr)
    }

    /// Shared constructor taking the standard-error destination as a [`MakeWriter`], so tests
    /// can observe routing without capturing the real stream.
    fn with_stderr_writer<W>(
        debug: bool,
        trace: bool,
        trace_file: Option<&Path>,
        stderr_writer: W,
    ) -> Result<Self, LoggerError>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let level = if trace {
            Level::TRACE
        } else if debug {
            Level::DEBUG
        } else {
            Level::INFO
        };

        // Announced before any routing applies, so it only reaches the default destination.
        let announced = trace_file
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let announcement =
            formatter::render_line(Level::INFO, &format!("trace log file: {announced}"));
        let _ = stderr_writer.make_writer().write_all(announcement.as_bytes());

        let mut layers: Vec<BoxedLayer> = Vec::new();

        match trace_file {
            Some(path) => {
                let file = open_trace_file(path)?;
                if is_stderr_stream(&file) {
                    // Writing to the file would duplicate every line on stderr.
                    layers.push(
                        PlainFormattingLayer::new(stderr_writer)
                            .with_filter(LevelFilter::from_level(level))
                            .boxed(),
                    );
                } else {
                    layers.push(
                        PlainFormattingLayer::new(Arc::new(file))
                            .with_filter(LevelFilter::from_level(level))
                            .boxed(),
                    );
                    layers.push(
                        PlainFormattingLayer::new(stderr_writer)
                            .with_filter(LevelFilter::INFO)
                            .boxed(),
                    );
                }
            }
            None => {
                layers.push(
                    PlainFormattingLayer::new(stderr_writer)
                        .with_filter(LevelFilter::from_level(level))
                        .boxed(),
                );
            }
        }

        let subscriber = tracing_subscriber::registry().with(layers);

        Ok(Self {
            core: Arc::new(LoggerCore {
                dispatch: Dispatch::new(subscriber),
                level,
            }),
            prefix: String::new(),
        })
    }

    /// The minimum level this logger was configured with.
    pub fn level(&self) -> Level {
        self.core.level
    }

    /// The prefix applied to every message emitted through this instance.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The underlying dispatcher, for emitting `tracing` events directly against this logger's
    /// destinations.
    pub fn dispatch(&self) -> &Dispatch {
        &self.core.dispatch
    }

    /// Derives a child logger sharing this logger's destinations, level and prefix.
    pub fn child(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            prefix: self.prefix.clone(),
        }
    }

    /// Derives a child logger with `prefix` appended to this logger's prefix.
    ///
    /// An empty `prefix` yields a child identical to [`Logger::child`].
    pub fn child_with_prefix(&self, prefix: &str) -> Self {
        let prefix = if prefix.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{prefix} ", self.prefix)
        };

        Self {
            core: Arc::clone(&self.core),
            prefix,
        }
    }

    /// Logs a message at trace level.
    pub fn trace(&self, message: impl fmt::Display) {
        self.emit(Level::TRACE, &message);
    }

    /// Logs a message at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::DEBUG, &message);
    }

    /// Logs a message at info level.
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::INFO, &message);
    }

    /// Logs a message at warning level.
    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Level::WARN, &message);
    }

    /// Logs a message at error level.
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::ERROR, &message);
    }

    /// Logs a message at error level, then terminates the process with a non-zero status.
    ///
    /// `tracing` has no level above `ERROR`; fatal messages follow the same routing as errors.
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.emit(Level::ERROR, &message);
        std::process::exit(1);
    }

    /// Renders `value` as indented JSON for trace-level diagnostics.
    ///
    /// Returns an empty string unless this logger was configured at trace level, so callers can
    /// invoke it unconditionally without paying the serialization cost when trace output is
    /// disabled.
    ///
    /// Serialization failures, including panics raised inside a `Serialize` implementation,
    /// degrade to the value's `Debug` representation with the failure reason appended. The
    /// returned string is all-or-nothing: either the full JSON text or the fallback text, never
    /// a partial result. This method does not propagate any fault to the caller. Note that a
    /// recovered panic still runs the process-global panic hook first, which by default prints
    /// its own report to standard error before the fallback string is returned.
    pub fn trace_json<T>(&self, value: &T) -> String
    where
        T: Serialize + fmt::Debug,
    {
        if self.core.level != Level::TRACE {
            return String::new();
        }

        match panic::catch_unwind(AssertUnwindSafe(|| serde_json::to_string_pretty(value))) {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(error)) => render_json_fallback(value, &error.to_string()),
            Err(payload) => render_json_fallback(value, &panic_reason(payload.as_ref())),
        }
    }

    fn emit(&self, level: Level, message: &dyn fmt::Display) {
        let body = format!("{}{}", self.prefix, message);

        // Event macros pick up the facade's own dispatcher instead of the global default.
        tracing::dispatcher::with_default(&self.core.dispatch, || {
            if level == Level::TRACE {
                tracing::trace!("{body}");
            } else if level == Level::DEBUG {
                tracing::debug!("{body}");
            } else if level == Level::INFO {
                tracing::info!("{body}");
            } else if level == Level::WARN {
                tracing::warn!("{body}");
            } else {
                tracing::error!("{body}");
            }
        });
    }
}

fn open_trace_file(path: &Path) -> Result<File, LoggerError> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }

    options.open(path).map_err(|source| LoggerError::TraceFileOpen {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether the opened file refers to the same kernel object as the standard-error stream.
#[cfg(unix)]
fn is_stderr_stream(file: &File) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(file_metadata) = file.metadata() else {
        return false;
    };
    // `/dev/stderr` resolves to whatever fd 2 currently points at.
    let Ok(stderr_metadata) = std::fs::metadata("/dev/stderr") else {
        return false;
    };

    file_metadata.dev() == stderr_metadata.dev() && file_metadata.ino() == stderr_metadata.ino()
}

#[cfg(not(unix))]
fn is_stderr_stream(_file: &File) -> bool {
    false
}

/// Best-effort textual fallback when JSON encoding fails.
///
/// The `Debug` dump itself is panic-guarded, so this always yields a usable string.
fn render_json_fallback(value: &dyn fmt::Debug, reason: &str) -> String {
    let dump = panic::catch_unwind(AssertUnwindSafe(|| format!("{value:?}")))
        .unwrap_or_else(|_| String::from("<value unavailable>"));
    format!("{dump} (unable to encode to json: {reason})")
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("panic during serialization")
    }
}
