//! The read contract the checker needs from a TSM file.

use super::{BlockIndexEntry, DecodedBlock, SeriesKey, TimeBounds, ValueType};
use crate::error::Result;

/// Read access to an opened TSM file's index and blocks.
///
/// Keys are addressed by ordinal in `0..key_count()`. The ordinal order is
/// whatever the file stores and need not be lexical.
pub trait BlockSource {
    /// Time range advertised by the file header.
    fn time_range(&self) -> TimeBounds;

    /// Number of keys in the index.
    fn key_count(&self) -> usize;

    /// Returns the key and value type at `ordinal`.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::IndexDecode` if the ordinal is out of range or the
    /// index entry cannot be read.
    fn key_at(&self, ordinal: usize) -> Result<(SeriesKey, ValueType)>;

    /// Returns the block entries for `key` in stored order.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::KeyNotFound` or `TsmError::IndexDecode`; either is
    /// fatal for the file.
    fn entries(&self, key: &SeriesKey) -> Result<Vec<BlockIndexEntry>>;

    /// Decodes the block described by `entry` as `value_type` columns.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::BlockDecode` for malformed block bytes.
    fn decode_block(&self, entry: &BlockIndexEntry, value_type: ValueType) -> Result<DecodedBlock>;

    /// Verifies the whole-file checksum, if the format carries one.
    ///
    /// Returns `Ok(None)` when there is nothing to verify.
    fn verify_file_checksum(&self) -> Result<Option<ChecksumStatus>> {
        Ok(None)
    }
}

/// Outcome of a whole-file checksum verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumStatus {
    /// Checksum stored in the footer.
    pub expected: u32,
    /// Checksum computed over the file contents.
    pub actual: u32,
}

impl ChecksumStatus {
    /// Returns true if the stored and computed checksums agree.
    pub fn is_valid(&self) -> bool {
        self.expected == self.actual
    }
}
