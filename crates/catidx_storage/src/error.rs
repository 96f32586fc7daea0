//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The part file is corrupted.
    #[error("storage corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the damaged record.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// Another process holds the part file.
    #[error("part file locked: another process has exclusive access")]
    Locked,

    /// The record does not fit the record header.
    #[error("record too large: {len} bytes")]
    RecordTooLarge {
        /// Payload length in bytes.
        len: usize,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
