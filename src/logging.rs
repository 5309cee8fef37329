//! Tracing setup: human-readable output on stderr plus the plain-text run log
//! that the tailer and `bloom status` read back.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// The run log. It starts closed so that nothing is written before an
/// installation begins, and can be archived and reopened between runs.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            file: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open for appending, creating the file if needed. No-op when open.
    pub fn open(&self) -> io::Result<()> {
        let mut guard = self.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Close the log and move it aside as `bloom-YYYYMMDD-HHMMSS.log`.
    ///
    /// Returns the archive path, or `None` when there was nothing to archive.
    /// The log stays closed; call [`LogFile::open`] to start a fresh one.
    pub fn archive(&self) -> io::Result<Option<PathBuf>> {
        let mut guard = self.lock();
        if let Some(mut file) = guard.take() {
            file.flush()?;
        }
        if !self.path.exists() {
            return Ok(None);
        }

        let target = archive_path(&self.path);
        std::fs::rename(&self.path, &target)?;
        Ok(Some(target))
    }

    pub fn writer(self: &Arc<Self>) -> LogFileWriter {
        LogFileWriter(Arc::clone(self))
    }
}

fn archive_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bloom");
    let stamp = Local::now().format("%Y%m%d-%H%M%S");

    let mut candidate = dir.join(format!("{}-{}.log", stem, stamp));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}-{}-{}.log", stem, stamp, counter));
        counter += 1;
    }
    candidate
}

/// Writer handed to the file layer. Writes are dropped while the log is
/// closed.
#[derive(Debug, Clone)]
pub struct LogFileWriter(Arc<LogFile>);

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock().as_mut() {
            Some(file) => file.write_all(buf).map(|()| buf.len()),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[derive(Debug, Default)]
pub struct LoggingOptions {
    /// Number of `-v` flags.
    pub verbosity: u8,
    /// Only warnings and errors on stderr unless `-v` was given. Used when
    /// the terminal shows its own progress output.
    pub quiet_console: bool,
    pub log_file: Option<Arc<LogFile>>,
}

fn console_directive(options: &LoggingOptions) -> &'static str {
    match options.verbosity {
        0 if options.quiet_console => "warn",
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the console level.
pub fn init(options: LoggingOptions) -> anyhow::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(&options)));

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(options.verbosity >= 2)
        .with_thread_ids(options.verbosity >= 3)
        .with_line_number(options.verbosity >= 3)
        .with_filter(console_filter);

    let file = options.log_file.as_ref().map(|log_file| {
        let level = if options.verbosity > 0 { "debug" } else { "info" };
        fmt::layer()
            .with_ansi(false)
            .with_writer(log_file.writer())
            .with_filter(EnvFilter::new(format!(
                "{},hyper=info,h2=info,tower=info,axum=info",
                level
            )))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}
