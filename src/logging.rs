//! Process-wide leveled logging
//!
//! Every line looks like `[2024-05-01 12:00:00] [INFO] message`. Console output is
//! colorized by level (ERROR goes to stderr, the rest to stdout); when a log file
//! is configured the same line is appended to it without color codes.
//!
//! SUCCESS is not a `tracing` level. It is an INFO event on [`SUCCESS_TARGET`],
//! which the filter always admits, so success lines survive `--log-level error`.

use clap::ValueEnum;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{self as tfmt, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Target used by the [`success!`](crate::success) macro
pub const SUCCESS_TARGET: &str = "kubestrap::success";

const RESET: &str = "\x1b[0m";

/// Emit a SUCCESS line (always shown, regardless of the configured level)
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        ::tracing::info!(target: $crate::logging::SUCCESS_TARGET, $($arg)+)
    };
}

/// Minimum level accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter for this level. Third-party crates never go below INFO.
    fn filter(&self) -> EnvFilter {
        let base = match self {
            LogLevel::Debug => "info",
            other => other.as_str(),
        };
        EnvFilter::new(format!(
            "{},kubestrap={},{}=info",
            base,
            self.as_str(),
            SUCCESS_TARGET
        ))
    }
}

/// Level tag printed in front of every line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Success,
    Error,
}

impl Severity {
    fn of(meta: &Metadata<'_>) -> Self {
        if meta.target() == SUCCESS_TARGET {
            return Severity::Success;
        }
        match *meta.level() {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Success => "SUCCESS",
            Severity::Error => "ERROR",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            Severity::Debug => "\x1b[36m",
            Severity::Info => "\x1b[34m",
            Severity::Warn => "\x1b[33m",
            Severity::Success => "\x1b[32m",
            Severity::Error => "\x1b[31m",
        }
    }
}

/// `log(level, message)` entry point for callers that pick the level at runtime
pub fn log(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => tracing::debug!("{}", message),
        Severity::Info => tracing::info!("{}", message),
        Severity::Warn => tracing::warn!("{}", message),
        Severity::Success => crate::success!("{}", message),
        Severity::Error => tracing::error!("{}", message),
    }
}

/// Timestamped, level-tagged line format shared by the console and file layers
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let severity = Severity::of(event.metadata());
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        if writer.has_ansi_escapes() {
            write!(
                writer,
                "{}[{}] [{}]{} ",
                severity.color(),
                timestamp,
                severity.label(),
                RESET
            )?;
        } else {
            write!(writer, "[{}] [{}] ", timestamp, severity.label())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Append-only log file that degrades to a no-op after the first failure
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
    reported: AtomicBool,
}

impl FileSink {
    /// Open (or create) the log file. Failure is reported once and leaves the sink inactive.
    pub fn open(path: &Path) -> Self {
        let sink = FileSink {
            path: path.to_path_buf(),
            file: Mutex::new(None),
            reported: AtomicBool::new(false),
        };

        match open_append(path) {
            Ok(file) => {
                *sink.file.lock().unwrap_or_else(|p| p.into_inner()) = Some(file);
            }
            Err(e) => sink.report(&e),
        }

        sink
    }

    pub fn is_active(&self) -> bool {
        self.file
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn report(&self, err: &io::Error) {
        if !self.reported.swap(true, Ordering::SeqCst) {
            eprintln!(
                "[{}] [WARN] Log file {} is not writable ({}); continuing with console logging only",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                self.path.display(),
                err
            );
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl io::Write for &FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(file) = guard.as_mut() {
            if let Err(e) = io::Write::write_all(file, buf) {
                *guard = None;
                drop(guard);
                self.report(&e);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = io::Write::flush(file);
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = &'a FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn build_subscriber(level: LogLevel, file: Option<FileSink>) -> impl Subscriber + Send + Sync {
    let console = tfmt::layer()
        .event_format(LineFormat)
        .with_ansi(io::stdout().is_terminal())
        .with_writer(
            io::stderr
                .with_max_level(tracing::Level::ERROR)
                .or_else(io::stdout),
        );

    let file_layer = file.map(|sink| {
        tfmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(sink)
    });

    tracing_subscriber::registry()
        .with(level.filter())
        .with(console)
        .with(file_layer)
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(level: LogLevel, log_file: Option<&Path>) {
    let sink = log_file.map(FileSink::open).filter(FileSink::is_active);
    let _ = build_subscriber(level, sink).try_init();
}
