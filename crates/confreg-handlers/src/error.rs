//! Error types for confreg-handlers

use std::path::PathBuf;

/// Result type for confreg-handlers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while indexing or running handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A descriptor file is not valid stanza syntax
    #[error("Failed to parse descriptor {path} at line {line}: {message}")]
    DescriptorParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A variable pattern failed to compile
    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A handler ran and failed
    #[error("Handler {handler} failed: {message}")]
    HandlerFailed { handler: String, message: String },

    /// No descriptor file exists for the package
    #[error("Unknown package: {package}")]
    UnknownPackage { package: String },

    /// A `key=value` / `key?value` argument could not be parsed
    #[error("Invalid assignment {argument:?}: expected key=value or key?value")]
    InvalidAssignment { argument: String },

    /// `handler_order` names a kind that does not exist
    #[error("Unknown handler kind in handler order: {kind}")]
    UnknownHandlerKind { kind: String },

    /// Registry error from confreg-core
    #[error(transparent)]
    Core(#[from] confreg_core::Error),

    /// Filesystem error from confreg-fs
    #[error(transparent)]
    Fs(#[from] confreg_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn handler_failed(handler: &str, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            handler: handler.to_string(),
            message: message.into(),
        }
    }
}
