//! Shared logging setup for Pagewarden binaries: tracing to stderr plus a
//! size-capped rolling log file under the Pagewarden home directory.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "pagewarden=info,pagewarden_engine=info,pagewarden_db=info";
const KEPT_LOG_FILES: usize = 5;
const ROLL_AT_BYTES: u64 = 10 * 1024 * 1024;

/// Initialize tracing for a binary named `app_name`.
///
/// Log lines always reach a rolling file under `~/.pagewarden/logs`; the
/// stderr layer uses the same filter, or everything at `RUST_LOG`'s level
/// when `verbose` is set.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = RollingWriter::open(&log_dir, app_name)
        .context("Failed to initialize rolling log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Pagewarden home directory: `$PAGEWARDEN_HOME` or `~/.pagewarden`.
pub fn pagewarden_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("PAGEWARDEN_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".pagewarden")
}

/// Logs directory: `~/.pagewarden/logs`.
pub fn logs_dir() -> PathBuf {
    pagewarden_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct LogFile {
    dir: PathBuf,
    stem: String,
    file: File,
    written: u64,
}

impl LogFile {
    fn open(dir: &Path, stem: String) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem,
            file,
            written,
        };
        if log.written >= ROLL_AT_BYTES {
            log.roll()?;
        }
        Ok(log)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn archived_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.stem))
    }

    /// Shift `name.log.N` up by one, dropping the oldest, then reopen a
    /// fresh active file.
    fn roll(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.archived_path(KEPT_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..KEPT_LOG_FILES - 1).rev() {
            let src = self.archived_path(index);
            if src.exists() {
                fs::rename(&src, self.archived_path(index + 1))?;
            }
        }
        let active = self.active_path();
        if active.exists() {
            fs::rename(&active, self.archived_path(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > ROLL_AT_BYTES {
            self.roll()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct RollingWriter {
    inner: Arc<Mutex<LogFile>>,
}

impl RollingWriter {
    fn open(dir: &Path, app_name: &str) -> Result<Self> {
        let stem: String = app_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        let log = LogFile::open(dir, stem)
            .with_context(|| format!("Failed to open log file for {app_name}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(log)),
        })
    }
}

struct RollingWriterGuard {
    inner: Arc<Mutex<LogFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}
