//! Error types for lodedb core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in lodedb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] lodedb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted record index is corrupted or invalid.
    #[error("corrupted index: {message}")]
    CorruptedIndex {
        /// Description of the corruption.
        message: String,
    },

    /// The write-ahead log is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record id referenced a slot outside the table or a free slot.
    #[error("record id {id} is out of range or not live")]
    OutOfRange {
        /// The offending record id.
        id: u64,
    },

    /// A byte position fell outside the bounds of a record.
    #[error("position {position} is out of bounds of record {id} ({start}-{end})")]
    PositionOutOfBounds {
        /// The record whose bounds were violated.
        id: u64,
        /// The requested position, relative to the stream.
        position: i64,
        /// Start of the record's payload in the stream.
        start: i64,
        /// End of the record's payload in the stream.
        end: i64,
    },

    /// The store is already open in another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Invalid file format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

impl CoreError {
    /// Creates a corrupted index error.
    pub fn corrupted_index(message: impl Into<String>) -> Self {
        Self::CorruptedIndex {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an out-of-range error for a record id.
    pub fn out_of_range(id: u64) -> Self {
        Self::OutOfRange { id }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}
