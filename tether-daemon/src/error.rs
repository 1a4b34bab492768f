use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the config-sync daemon, monitor and registrar runtimes.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("mapping error: {0}")]
    Mapping(#[from] tether_core::MappingError),

    #[error("client error: {0}")]
    Client(#[from] tether_client::ClientError),

    #[error("sync error: {0}")]
    Sync(#[from] tether_sync::SyncError),

    #[error("could not connect to {label} after {attempts} attempt(s): {last_error}")]
    ConnectFailed {
        label: String,
        attempts: u32,
        last_error: String,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{0}")]
    TaskJoin(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
