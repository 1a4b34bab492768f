//! Error types for tether-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading a mapping file.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The mapping file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error — includes file path and line context from serde_yaml.
    #[error("failed to parse mapping file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `file_mode` was not a valid permission value.
    #[error("invalid file_mode '{mode}' for config '{data_id}'")]
    InvalidMode { data_id: String, mode: String },
}
