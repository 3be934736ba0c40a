//! Byte accounting for outstanding mappings.

use crate::error::{Result, TsmError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Origin of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackingKind {
    /// Read-only, shared mapping of a file on disk.
    File,
    /// Private, writable memory with no backing file.
    Anonymous,
}

/// Counters of currently reserved bytes, split by backing kind.
///
/// Every map adds the page-rounded reservation and every unmap subtracts it,
/// so at any quiescent point the totals equal the sum of outstanding regions.
#[derive(Debug, Default)]
pub struct ByteAccount {
    file: AtomicU64,
    anonymous: AtomicU64,
}

/// Point-in-time copy of a [`ByteAccount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountSnapshot {
    /// Bytes reserved by file-backed regions.
    pub file: u64,
    /// Bytes reserved by anonymous regions.
    pub anonymous: u64,
}

impl AccountSnapshot {
    /// Returns the combined reservation.
    pub fn total(&self) -> u64 {
        self.file + self.anonymous
    }
}

impl ByteAccount {
    /// Creates an account with both counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: BackingKind) -> &AtomicU64 {
        match kind {
            BackingKind::File => &self.file,
            BackingKind::Anonymous => &self.anonymous,
        }
    }

    /// Adds `bytes` to the counter for `kind` and returns the new value.
    pub fn charge(&self, kind: BackingKind, bytes: u64) -> u64 {
        self.counter(kind).fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Subtracts `bytes` from the counter for `kind` and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Unmap` if the counter holds fewer than `bytes`,
    /// which means the region was never charged to this account. The counter
    /// is left untouched in that case.
    pub fn release(&self, kind: BackingKind, bytes: u64) -> Result<u64> {
        self.counter(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(bytes)
            })
            .map(|previous| previous - bytes)
            .map_err(|current| {
                TsmError::Unmap(format!(
                    "releasing {} {:?} bytes from an account holding {}",
                    bytes, kind, current
                ))
            })
    }

    /// Bytes currently reserved by file-backed regions.
    pub fn file_bytes(&self) -> u64 {
        self.file.load(Ordering::Acquire)
    }

    /// Bytes currently reserved by anonymous regions.
    pub fn anonymous_bytes(&self) -> u64 {
        self.anonymous.load(Ordering::Acquire)
    }

    /// Returns both counters.
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            file: self.file_bytes(),
            anonymous: self.anonymous_bytes(),
        }
    }
}
