//! Error types for catidx core.

use crate::part::PartKind;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in catidx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] catidx_storage::StorageError),

    /// CBOR body could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Part envelope is malformed or of an unknown version.
    #[error("invalid part format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A stored part decoded but its contents are inconsistent.
    #[error("part corruption: {message}")]
    PartCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A unique value is already owned by another record.
    #[error("unique value {value} already maps to {existing}, rejected {rejected}")]
    UniquenessViolation {
        /// Rendered conflicting value.
        value: String,
        /// Record that already owns the value.
        existing: u32,
        /// Record whose insert was rejected.
        rejected: u32,
    },

    /// A part's recomputed identity differs from the one it carries.
    #[error("identity mismatch for {kind} part: assigned {assigned}, computed {computed}")]
    IdentityMismatch {
        /// Kind of the offending part.
        kind: PartKind,
        /// Identity already assigned to the part.
        assigned: u64,
        /// Identity computed from the current key.
        computed: u64,
    },

    /// A directory references a part that cannot be resolved.
    #[error("missing {kind} storage part: {key}")]
    MissingStoragePart {
        /// Kind of the missing part.
        kind: PartKind,
        /// Rendered key or id of the missing part.
        key: String,
    },

    /// Encoded part exceeds the configured maximum size.
    #[error("part too large: {size} bytes (max {max})")]
    PartTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The key compressor was used after it was closed.
    #[error("key compressor is closed")]
    CompressorClosed,

    /// An operation was invoked on a state that does not allow it.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },

    /// The part store file does not exist and creation is disabled.
    #[error("part store not found: {path}")]
    StoreNotFound {
        /// Path that was looked up.
        path: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a part corruption error.
    pub fn part_corruption(message: impl Into<String>) -> Self {
        Self::PartCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a missing part error.
    pub fn missing_part(kind: PartKind, key: impl Into<String>) -> Self {
        Self::MissingStoragePart {
            kind,
            key: key.into(),
        }
    }

    /// Returns true for errors after which the store must not be trusted.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IdentityMismatch { .. }
                | Self::MissingStoragePart { .. }
                | Self::PartCorruption { .. }
                | Self::Storage(catidx_storage::StorageError::Corrupted { .. })
        )
    }
}
