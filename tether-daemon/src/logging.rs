//! Tracing setup shared by every agent.
//!
//! Console output goes to stderr. When a log file is configured, events are
//! also appended to it; the file is reopened per event so size-based rotation
//! (see [`crate::log_rotation`]) takes effect without a restart.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{io_err, DaemonError};

/// Where and how to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub file: Option<PathBuf>,
    /// Write the file layer as JSON lines.
    pub json: bool,
}

impl LogOptions {
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            json: false,
        }
    }

    pub fn console_only() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct AppendFile {
    path: PathBuf,
}

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = Box<dyn Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
///
/// A second call is a no-op, so tests and embedders may call it freely.
pub fn init_tracing(options: &LogOptions) -> Result<(), DaemonError> {
    if let Some(path) = &options.file {
        ensure_parent(path)?;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false).with_writer(io::stderr);
    let file = options.file.as_ref().map(|path| {
        let layer = fmt::layer().with_ansi(false).with_writer(AppendFile {
            path: path.clone(),
        });
        if options.json {
            layer.json().boxed()
        } else {
            layer.with_target(false).boxed()
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), DaemonError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_writer_creates_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        let make = AppendFile { path: path.clone() };

        make.make_writer().write_all(b"one\n").unwrap();
        make.make_writer().write_all(b"two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn append_writer_follows_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        let make = AppendFile { path: path.clone() };

        make.make_writer().write_all(b"before\n").unwrap();
        fs::rename(&path, dir.path().join("agent.log.1")).unwrap();
        make.make_writer().write_all(b"after\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "after\n");
    }

    #[test]
    fn init_creates_log_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log").join("agent.log");
        init_tracing(&LogOptions::with_file(&path)).unwrap();
        assert!(dir.path().join("log").is_dir());
    }
}
