//! Error and Result types for Skulk TSM inspection.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for Skulk check operations.
pub type Result<T> = std::result::Result<T, TsmError>;

/// The error type for mapping, parsing and verifying TSM files.
#[derive(Debug, Error)]
pub enum TsmError {
    /// The file could not be opened or stat-ed.
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The operating system refused to create a mapping.
    #[error("Failed to map {}: {source}", path.display())]
    Map {
        /// Path of the file being mapped, or `<anonymous>`.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Releasing a mapping failed or left the byte account inconsistent.
    #[error("Failed to unmap region: {0}")]
    Unmap(String),

    /// A reclaim hint was rejected by the operating system.
    #[error("Failed to advise region: {0}")]
    Advise(#[source] io::Error),

    /// Invalid magic bytes in TSM file header or footer.
    #[error("Invalid magic bytes: expected ATSM, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported TSM file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// File checksum does not match expected value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// The footer or key index could not be parsed.
    #[error("Index decode error: {0}")]
    IndexDecode(String),

    /// A single block could not be decoded.
    #[error("Block decode error at offset {offset}: {reason}")]
    BlockDecode {
        /// File offset of the block.
        offset: u64,
        /// Human readable cause.
        reason: String,
    },

    /// Requested series key was not found in the TSM file.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TsmError {
    /// Returns true if this error aborts the scan of the file that raised it.
    ///
    /// Block decode failures are the only recoverable kind; the verifier
    /// turns them into anomalies and moves on to the next block.
    pub fn is_fatal_for_file(&self) -> bool {
        !matches!(self, TsmError::BlockDecode { .. })
    }

    pub(crate) fn block(offset: u64, reason: impl Into<String>) -> Self {
        TsmError::BlockDecode {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn index(reason: impl Into<String>) -> Self {
        TsmError::IndexDecode(reason.into())
    }
}
