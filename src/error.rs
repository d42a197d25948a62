//! Error types for the binary data store

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::marker::MarkerKind;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, BinaryDataError>;

/// Errors surfaced by the binary data store
#[derive(Debug, Error)]
pub enum BinaryDataError {
    /// A resolved path would leave the storage root
    #[error("invalid path detected: {path}")]
    PathEscape { path: String },

    /// Payload or metadata file is absent
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Metadata sidecar could not be encoded or decoded
    #[error("invalid metadata in {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// One or more deletions failed during a sweep
    #[error("{kind} sweep failed for {failed} of {total} entries")]
    SweepFailure {
        kind: MarkerKind,
        failed: usize,
        total: usize,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BinaryDataError {
    /// Wrap a read-side I/O error, mapping a missing file to `NotFound`
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            BinaryDataError::NotFound { path }
        } else {
            BinaryDataError::Read { path, source }
        }
    }

    /// Wrap a write-side I/O error
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BinaryDataError::Write {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means the object is absent (expired or never stored)
    pub fn is_not_found(&self) -> bool {
        matches!(self, BinaryDataError::NotFound { .. })
    }
}
