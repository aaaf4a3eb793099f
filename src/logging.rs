use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::OutputFormat;

// ── LogFile ──────────────────────────────────────────────

/// A `MakeWriter` that discards until [`LogFileHandle::open`] points it at a
/// file. The subscriber is installed before the config (which names the
/// file) has been read.
#[derive(Clone, Default)]
pub struct LogFile {
    file: Arc<Mutex<Option<File>>>,
}

/// Activation side of a [`LogFile`].
#[derive(Clone)]
pub struct LogFileHandle {
    file: Arc<Mutex<Option<File>>>,
}

impl LogFile {
    pub fn new() -> (Self, LogFileHandle) {
        let writer = Self::default();
        let handle = LogFileHandle {
            file: writer.file.clone(),
        };
        (writer, handle)
    }
}

impl LogFileHandle {
    /// Start appending to `path`, creating parent directories as needed.
    pub fn open(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.file) = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.file).is_some()
    }
}

fn lock(file: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LogFileWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.file).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.file).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            file: self.file.clone(),
        }
    }
}

// ── subscriber setup ─────────────────────────────────────

/// Filter for the stderr layer.
///
/// JSON output keeps stderr quiet unless `--verbose` is given, so scripts
/// parsing stdout never see log noise mixed into error output.
fn terminal_filter(verbose: bool, output: OutputFormat) -> EnvFilter {
    match (verbose, output) {
        (true, _) => EnvFilter::new("vbm=debug"),
        (false, OutputFormat::Json) => EnvFilter::new("off"),
        (false, OutputFormat::Text) => EnvFilter::builder()
            .with_default_directive(LevelFilter::ERROR.into())
            .from_env_lossy(),
    }
}

/// Install the global subscriber: a stderr layer plus a file layer that
/// captures `vbm=debug` once activated through the returned handle.
pub fn init(verbose: bool, output: OutputFormat) -> LogFileHandle {
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(terminal_filter(verbose, output));

    let (file_writer, handle) = LogFile::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("vbm=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_discarded_until_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("vbm.log");
        let (writer, handle) = LogFile::new();

        writer.make_writer().write_all(b"dropped\n").unwrap();
        assert!(!handle.is_open());
        assert!(!path.exists());

        handle.open(&path).unwrap();
        writer.make_writer().write_all(b"kept\n").unwrap();
        writer.make_writer().flush().unwrap();

        assert!(handle.is_open());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }

    #[test]
    fn open_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vbm.log");
        std::fs::write(&path, "old\n").unwrap();

        let (writer, handle) = LogFile::new();
        handle.open(&path).unwrap();
        writer.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }
}
