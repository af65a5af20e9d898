//! File-backed sink for the `log` facade.
//!
//! The agent appends human-readable diagnostics to a file named `log` in
//! the working directory, one line per record, prefixed with the
//! originating module as its tag:
//!
//! ```text
//! tandem_collab::transport: connection lost (connection refused); retrying in 10ms
//! tandem_collab::agent: synced as author 2 (118 bytes)
//! ```
//!
//! Errors that matter to the user are additionally surfaced through the
//! editor's error channel at their call sites; this sink is the full
//! record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};

/// Default diagnostics file, relative to the working directory.
pub const DEFAULT_LOG_PATH: &str = "log";

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("a logger is already installed")]
    AlreadySet,
}

/// Appends `tag: message` lines to a file.
pub struct FileLog {
    file: Mutex<File>,
    level: LevelFilter,
}

impl FileLog {
    pub fn open(path: impl AsRef<Path>, level: LevelFilter) -> Result<Self, LogInitError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileLog {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for FileLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}: {}", record.target(), record.args());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install a [`FileLog`] on `path` as the global logger.
pub fn init(path: impl AsRef<Path>, level: LevelFilter) -> Result<(), LogInitError> {
    let logger = FileLog::open(path, level)?;
    log::set_boxed_logger(Box::new(logger)).map_err(|_| LogInitError::AlreadySet)?;
    log::set_max_level(level);
    Ok(())
}

/// Install the default `log` file at debug level.
pub fn init_default() -> Result<(), LogInitError> {
    init(DEFAULT_LOG_PATH, LevelFilter::Debug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_tagged_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let sink = FileLog::open(&path, LevelFilter::Debug).unwrap();

        sink.log(
            &Record::builder()
                .args(format_args!("first line"))
                .level(log::Level::Info)
                .target("tandem_collab::transport")
                .build(),
        );
        sink.log(
            &Record::builder()
                .args(format_args!("second line"))
                .level(log::Level::Warn)
                .target("tandem_collab::agent")
                .build(),
        );
        sink.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "tandem_collab::transport: first line\ntandem_collab::agent: second line\n"
        );
    }

    #[test]
    fn test_level_filter_drops_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let sink = FileLog::open(&path, LevelFilter::Warn).unwrap();

        sink.log(
            &Record::builder()
                .args(format_args!("too quiet"))
                .level(log::Level::Debug)
                .target("tandem_collab")
                .build(),
        );
        sink.flush();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_open_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        for msg in ["one", "two"] {
            let sink = FileLog::open(&path, LevelFilter::Debug).unwrap();
            sink.log(
                &Record::builder()
                    .args(format_args!("{msg}"))
                    .level(log::Level::Info)
                    .target("t")
                    .build(),
            );
            sink.flush();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "t: one\nt: two\n");
    }
}
