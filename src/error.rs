use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::executor::BatchState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Corrupt metadata in {}: {reason}", .path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Cache error: {0}")]
    CacheCorruption(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Invalid batch transition from {from:?} to {to:?}")]
    InvalidTransition { from: BatchState, to: BatchState },

    #[error("Batch aborted: {0}")]
    BatchFatal(String),
}

/// Copyable classification of an [`Error`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptMetadata,
    IoFailure,
    PermissionDenied,
    DestinationExists,
    CacheCorruption,
    Config,
    Journal,
    InvalidTransition,
    BatchFatal,
}

impl Error {
    /// Wrap an IO error with the path it happened on, folding permission
    /// failures into their own variant.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Error::PermissionDenied(path)
        } else {
            Error::Io { path, source }
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::CorruptMetadata {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::CorruptMetadata { .. } => ErrorKind::CorruptMetadata,
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::DestinationExists(_) => ErrorKind::DestinationExists,
            Error::CacheCorruption(_) => ErrorKind::CacheCorruption,
            Error::Config(_) => ErrorKind::Config,
            Error::Journal(_) => ErrorKind::Journal,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::BatchFatal(_) => ErrorKind::BatchFatal,
        }
    }

    /// True for conditions where continuing the batch is pointless
    /// (no space left, quota exceeded).
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            Error::Io { source, .. } => is_storage_full(source),
            Error::BatchFatal(_) => true,
            _ => false,
        }
    }
}

fn is_storage_full(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded
    )
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
