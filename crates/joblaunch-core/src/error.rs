//! Error types for the `joblaunch` core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::hosts::RegistryError;
use crate::protocol::ProtocolError;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for launcher operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hostfile could not be read
    #[error("Failed to read hostfile {}: {source}", path.display())]
    Hostfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hostfile contained no usable host entries
    #[error("No hosts found in hostfile {}", .0.display())]
    EmptyHostfile(PathBuf),

    /// Host registry rejected an entry
    #[error("Host registry error at line {line}: {source}")]
    Registry {
        line: usize,
        #[source]
        source: RegistryError,
    },

    /// Control protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
