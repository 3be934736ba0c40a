//! Memory-mapped TSM file reader.
//!
//! The whole file is mapped through a [`RegionManager`] so that its bytes are
//! charged to the manager's account for as long as the reader lives. The
//! header, footer and key table are parsed on open. Block entries and block
//! bytes are read from the mapping on demand.

use super::file::{
    BlockView, BloomFilter, ByteCursor, TsmFooter, TsmHeader, FOOTER_SIZE, HEADER_SIZE,
    INDEX_ENTRY_SIZE,
};
use super::source::{BlockSource, ChecksumStatus};
use super::{BlockIndexEntry, DecodedBlock, SeriesKey, TimeBounds, ValueType};
use crate::error::{Result, TsmError};
use crate::mmap::{Advice, MappedRegion, RegionManager};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Location of one key's record inside the mapped index.
#[derive(Debug, Clone)]
struct KeySlot {
    key: SeriesKey,
    value_type: ValueType,
    entries: Range<usize>,
}

/// Read-only view of a TSM file backed by a mapped region.
#[derive(Debug)]
pub struct TsmReader {
    path: PathBuf,
    manager: RegionManager,
    region: MappedRegion,
    header: TsmHeader,
    footer: TsmFooter,
    slots: Vec<KeySlot>,
    ordinals: HashMap<SeriesKey, usize>,
    bloom: BloomFilter,
}

impl TsmReader {
    /// Maps and opens the TSM file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Open` or `TsmError::Map` if the file cannot be
    /// mapped, `TsmError::InvalidMagic` or `TsmError::UnsupportedVersion`
    /// for foreign files and `TsmError::IndexDecode` if the footer or key
    /// table is malformed, including a key listed more than once. An empty
    /// file is an index decode error.
    pub fn open(manager: &RegionManager, path: &Path) -> Result<Self> {
        let region = manager.map_file(path, 0)?;
        // On error the region drops here and releases its reservation.
        let Layout {
            header,
            footer,
            slots,
            ordinals,
            bloom,
        } = parse_layout(region.as_slice())?;

        debug!(
            "Opened {} with {} keys, {} points, level {}",
            path.display(),
            slots.len(),
            footer.total_point_count,
            header.level
        );

        Ok(Self {
            path: path.to_path_buf(),
            manager: manager.clone(),
            region,
            header,
            footer,
            slots,
            ordinals,
            bloom,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed file header.
    pub fn header(&self) -> &TsmHeader {
        &self.header
    }

    /// Parsed file footer.
    pub fn footer(&self) -> &TsmFooter {
        &self.footer
    }

    /// Size of the mapped file in bytes.
    pub fn file_size(&self) -> usize {
        self.region.len()
    }

    /// Returns true if `key` is present in the index.
    pub fn contains_key(&self, key: &SeriesKey) -> bool {
        self.bloom.maybe_contains(key.as_bytes()) && self.ordinals.contains_key(key)
    }

    /// Asks the OS to drop the cached pages of the mapping.
    ///
    /// The reader stays valid; pages are faulted back in on next access.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Advise` if the hint is rejected.
    pub fn release_cache(&self) -> Result<()> {
        self.manager.advise(&self.region, Advice::ReclaimNow)
    }

    /// Unmaps the file and releases its accounted bytes.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Unmap` if the account is inconsistent.
    pub fn close(self) -> Result<()> {
        trace!("closing {}", self.path.display());
        self.manager.unmap(self.region)
    }

    fn slot(&self, key: &SeriesKey) -> Result<&KeySlot> {
        if !self.bloom.maybe_contains(key.as_bytes()) {
            return Err(TsmError::KeyNotFound(key.to_string()));
        }
        self.ordinals
            .get(key)
            .map(|&ordinal| &self.slots[ordinal])
            .ok_or_else(|| TsmError::KeyNotFound(key.to_string()))
    }

    fn block_bytes(&self, entry: &BlockIndexEntry) -> Result<&[u8]> {
        let data_start = self.footer.data_offset;
        let data_end = data_start.saturating_add(self.footer.data_size);
        let end = entry.offset.saturating_add(u64::from(entry.size));
        if entry.offset < data_start || end > data_end {
            return Err(TsmError::block(
                entry.offset,
                format!(
                    "block [{}, {}) lies outside data section [{}, {})",
                    entry.offset, end, data_start, data_end
                ),
            ));
        }
        // Bounds were validated against the data section on open.
        Ok(&self.region.as_slice()[entry.offset as usize..end as usize])
    }
}

impl BlockSource for TsmReader {
    fn time_range(&self) -> TimeBounds {
        TimeBounds::new(self.header.min_timestamp, self.header.max_timestamp)
    }

    fn key_count(&self) -> usize {
        self.slots.len()
    }

    fn key_at(&self, ordinal: usize) -> Result<(SeriesKey, ValueType)> {
        self.slots
            .get(ordinal)
            .map(|slot| (slot.key.clone(), slot.value_type))
            .ok_or_else(|| {
                TsmError::index(format!(
                    "ordinal {} out of range for {} keys",
                    ordinal,
                    self.slots.len()
                ))
            })
    }

    fn entries(&self, key: &SeriesKey) -> Result<Vec<BlockIndexEntry>> {
        let slot = self.slot(key)?;
        let raw = self
            .region
            .as_slice()
            .get(slot.entries.clone())
            .ok_or_else(|| TsmError::index(format!("entries of {} outside mapping", key)))?;
        let mut cursor = ByteCursor::new(raw);
        (0..raw.len() / INDEX_ENTRY_SIZE)
            .map(|_| {
                BlockIndexEntry::read_from(&mut cursor)
                    .ok_or_else(|| TsmError::index(format!("truncated entry for {}", key)))
            })
            .collect()
    }

    fn decode_block(&self, entry: &BlockIndexEntry, value_type: ValueType) -> Result<DecodedBlock> {
        let bytes = self.block_bytes(entry)?;
        if bytes.len() != entry.size as usize {
            return Err(TsmError::block(entry.offset, "block size mismatch"));
        }
        BlockView::parse(bytes, entry.offset)?.decode(value_type, entry.offset)
    }

    fn verify_file_checksum(&self) -> Result<Option<ChecksumStatus>> {
        let bytes = self.region.as_slice();
        let covered = bytes.len() - FOOTER_SIZE;
        Ok(Some(ChecksumStatus {
            expected: self.footer.file_crc32,
            actual: crc32fast::hash(&bytes[..covered]),
        }))
    }
}

struct Layout {
    header: TsmHeader,
    footer: TsmFooter,
    slots: Vec<KeySlot>,
    ordinals: HashMap<SeriesKey, usize>,
    bloom: BloomFilter,
}

fn parse_layout(bytes: &[u8]) -> Result<Layout> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(TsmError::index(format!(
            "file too small: {} bytes, need at least {}",
            bytes.len(),
            HEADER_SIZE + FOOTER_SIZE
        )));
    }

    let header = TsmHeader::parse(&bytes[..HEADER_SIZE])?;
    let footer_start = bytes.len() - FOOTER_SIZE;
    let footer = TsmFooter::parse(&bytes[footer_start..])?;

    let index_start = usize::try_from(footer.index_offset)
        .map_err(|_| TsmError::index("index offset exceeds address space"))?;
    let index_end = index_start
        .checked_add(footer.index_size as usize)
        .filter(|&end| index_start >= HEADER_SIZE && end <= footer_start)
        .ok_or_else(|| {
            TsmError::index(format!(
                "index [{}, +{}) outside file body of {} bytes",
                footer.index_offset, footer.index_size, footer_start
            ))
        })?;

    let data_end = footer.data_offset.checked_add(footer.data_size);
    if footer.data_offset < HEADER_SIZE as u64 || data_end.map_or(true, |end| end > footer.index_offset) {
        return Err(TsmError::index(format!(
            "data section [{}, +{}) overlaps header or index",
            footer.data_offset, footer.data_size
        )));
    }

    let index = &bytes[index_start..index_end];
    let mut cursor = ByteCursor::new(index);
    let key_count = cursor
        .u32()
        .ok_or_else(|| TsmError::index("missing key count"))? as usize;
    if key_count != header.key_count as usize {
        return Err(TsmError::index(format!(
            "index holds {} keys, header declares {}",
            key_count, header.key_count
        )));
    }

    let mut slots = Vec::with_capacity(key_count.min(index.len()));
    let mut ordinals = HashMap::with_capacity(key_count.min(index.len()));
    for ordinal in 0..key_count {
        let truncated = || TsmError::index(format!("key record {} truncated", ordinal));
        let key_len = cursor.u16().ok_or_else(truncated)? as usize;
        let key = SeriesKey::from(cursor.bytes(key_len).ok_or_else(truncated)?);
        let tag = cursor.u8().ok_or_else(truncated)?;
        let value_type = ValueType::from_u8(tag)
            .ok_or_else(|| TsmError::index(format!("key {} has unknown value type {}", key, tag)))?;
        let entry_count = cursor.u32().ok_or_else(truncated)? as usize;

        let start = index_start + cursor.position();
        let len = entry_count
            .checked_mul(INDEX_ENTRY_SIZE)
            .ok_or_else(truncated)?;
        cursor.bytes(len).ok_or_else(truncated)?;
        if let Some(first) = ordinals.insert(key.clone(), ordinal) {
            return Err(TsmError::index(format!(
                "duplicate key {} at records {} and {}",
                key, first, ordinal
            )));
        }
        slots.push(KeySlot {
            key,
            value_type,
            entries: start..start + len,
        });
    }

    let bloom = BloomFilter::read_from(&mut cursor)
        .ok_or_else(|| TsmError::index("bloom filter truncated"))?;

    Ok(Layout {
        header,
        footer,
        slots,
        ordinals,
        bloom,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsm::{TsmWriter, Values};
    use tempfile::TempDir;

    fn write_fixture(path: &Path) {
        let mut writer = TsmWriter::new(path).unwrap();
        writer
            .write_block(&SeriesKey::from("zeta"), &[1, 2, 3], &Values::Float(vec![1.0, 2.0, 3.0]))
            .unwrap();
        writer
            .write_block(&SeriesKey::from("alpha"), &[5, 6], &Values::Integer(vec![5, 6]))
            .unwrap();
        writer
            .write_block(&SeriesKey::from("zeta"), &[10, 20], &Values::Float(vec![0.5, 0.25]))
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_open_preserves_first_write_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.tsm");
        write_fixture(&path);

        let manager = RegionManager::new();
        let reader = TsmReader::open(&manager, &path).unwrap();
        assert_eq!(reader.key_count(), 2);
        assert_eq!(reader.key_at(0).unwrap(), (SeriesKey::from("zeta"), ValueType::Float));
        assert_eq!(reader.key_at(1).unwrap(), (SeriesKey::from("alpha"), ValueType::Integer));
        assert!(matches!(reader.key_at(2), Err(TsmError::IndexDecode(_))));
        assert_eq!(reader.time_range(), TimeBounds::new(1, 20));

        let entries = reader.entries(&SeriesKey::from("zeta")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].bounds(), TimeBounds::new(10, 20));

        let block = reader.decode_block(&entries[1], ValueType::Float).unwrap();
        assert_eq!(block.timestamps, vec![10, 20]);
        assert!(reader.verify_file_checksum().unwrap().unwrap().is_valid());
    }

    #[test]
    fn test_reader_charges_and_releases_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.tsm");
        write_fixture(&path);

        let manager = RegionManager::new();
        let reader = TsmReader::open(&manager, &path).unwrap();
        assert!(manager.snapshot().file > 0);
        reader.release_cache().unwrap();
        reader.close().unwrap();
        assert_eq!(manager.snapshot().file, 0);
    }

    #[test]
    fn test_unknown_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.tsm");
        write_fixture(&path);

        let reader = TsmReader::open(&RegionManager::new(), &path).unwrap();
        assert!(!reader.contains_key(&SeriesKey::from("missing")));
        assert!(matches!(
            reader.entries(&SeriesKey::from("missing")),
            Err(TsmError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_empty_file_is_index_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tsm");
        std::fs::write(&path, b"").unwrap();

        let manager = RegionManager::new();
        assert!(matches!(TsmReader::open(&manager, &path), Err(TsmError::IndexDecode(_))));
        assert_eq!(manager.snapshot().total(), 0);
    }

    #[test]
    fn test_duplicate_key_is_index_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.tsm");
        let mut writer = TsmWriter::new(&path).unwrap();
        writer
            .write_block(&SeriesKey::from("aa"), &[10, 20], &Values::Integer(vec![1, 2]))
            .unwrap();
        writer
            .write_block(&SeriesKey::from("aa"), &[0, 5], &Values::Integer(vec![3, 4]))
            .unwrap();
        writer
            .write_block(&SeriesKey::from("ab"), &[30, 40], &Values::Integer(vec![5, 6]))
            .unwrap();
        let handle = writer.finish().unwrap();

        // Second record: key count, then the first record with two entries.
        let first_record = 2 + 2 + 1 + 4 + 2 * INDEX_ENTRY_SIZE;
        let key_at = handle.footer.index_offset as usize + 4 + first_record + 2;
        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[key_at..key_at + 2], b"ab");
        bytes[key_at + 1] = b'a';
        std::fs::write(&path, &bytes).unwrap();

        let manager = RegionManager::new();
        let err = TsmReader::open(&manager, &path).unwrap_err();
        assert!(matches!(&err, TsmError::IndexDecode(msg) if msg.contains("duplicate key aa")));
        assert!(err.is_fatal_for_file());
        assert_eq!(manager.snapshot().total(), 0);
    }

    #[test]
    fn test_out_of_range_block_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.tsm");
        write_fixture(&path);

        let reader = TsmReader::open(&RegionManager::new(), &path).unwrap();
        let bogus = BlockIndexEntry::new(1, 3, 1 << 40, 64);
        let err = reader.decode_block(&bogus, ValueType::Float).unwrap_err();
        assert!(!err.is_fatal_for_file());
    }
}
