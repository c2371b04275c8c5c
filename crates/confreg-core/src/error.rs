//! Error types for confreg-core

use std::path::PathBuf;

/// Result type for confreg-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in confreg-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A layer file contains a line that is not `key: value`
    #[error("Corrupt layer file {path} at line {line}: {content:?}")]
    CorruptLayer {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// Key rejected by validation
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Value rejected by validation
    #[error("Invalid value for {key:?}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Delete of a key the write-target layer does not hold
    #[error("Key {key:?} is not set in layer {layer:?}")]
    KeyNotInLayer { key: String, layer: String },

    /// A layer name that is not part of the configured precedence list
    #[error("Unknown layer: {name}")]
    UnknownLayer { name: String },

    /// Settings are inconsistent
    #[error("Invalid settings: {message}")]
    InvalidSettings { message: String },

    /// Search pattern failed to compile
    #[error("Invalid search pattern {pattern:?}: {source}")]
    InvalidSearchPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Filesystem error from confreg-fs
    #[error(transparent)]
    Fs(#[from] confreg_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
