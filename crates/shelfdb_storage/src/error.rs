//! Error types for storage operations.

use shelfdb_codec::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The storage file is corrupted. Corruption is reported, never repaired.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend has been closed.
    #[error("storage is closed")]
    Closed,

    /// A write was attempted on a backend opened read-only.
    #[error("storage is opened read-only")]
    ReadOnly,

    /// Another handle holds the lock on this storage.
    #[error("storage is locked by another process: {}", path.display())]
    Locked {
        /// Path of the locked file.
        path: PathBuf,
    },

    /// The storage does not exist and the open mode does not create it.
    #[error("storage not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A key is not a valid composite `table.key` identifier.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
}

impl StorageError {
    /// Create a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
