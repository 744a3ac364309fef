//! Archive storage error types
//!
//! Defines all errors that can occur in the archive layer.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or storing archive records
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (length mismatch, out-of-range count,
    /// array past the declared record boundary, ...)
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Caller asked for something the pinned archive version cannot
    /// express, or handed the codec an invalid record. A programming
    /// error, never a corruption case.
    #[error("Illegal record: {0}")]
    IllegalRecord(String),

    /// Allocation failure while decoding an untrusted count
    #[error("Allocation of {bytes} bytes failed")]
    OutOfMemory { bytes: usize },

    /// A stream offset no longer fits the on-disk field width
    #[error("Archive file ({stream}) too big: offset {offset}")]
    OffsetTooLarge { stream: &'static str, offset: u64 },

    /// Archive label header is missing or malformed
    #[error("Invalid archive label: {0}")]
    BadLabel(String),
}

/// Result type alias for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
