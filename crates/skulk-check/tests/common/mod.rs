//! Shared fixtures for integration tests.

#![allow(dead_code)]

use skulk_check::tsm::{
    BlockIndexEntry, BlockSource, DecodedBlock, SeriesKey, TimeBounds, Timestamp, TsmWriter,
    ValueType, Values,
};
use skulk_check::{Result, TsmError};
use std::collections::HashMap;
use std::path::Path;

/// What `decode_block` returns for one entry.
#[derive(Debug, Clone)]
pub enum StoredBlock {
    Decoded(DecodedBlock),
    Corrupt(String),
    Unreadable,
}

/// In-memory block source whose index and block contents are set
/// independently, so any disagreement between them can be staged.
#[derive(Debug, Clone)]
pub struct MemorySource {
    range: TimeBounds,
    keys: Vec<(SeriesKey, ValueType, Vec<BlockIndexEntry>)>,
    blocks: HashMap<u64, StoredBlock>,
    broken_entries: Option<SeriesKey>,
    next_offset: u64,
}

impl MemorySource {
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        Self {
            range: TimeBounds::new(min, max),
            keys: Vec::new(),
            blocks: HashMap::new(),
            broken_entries: None,
            next_offset: 32,
        }
    }

    /// Starts a new key; following blocks belong to it.
    pub fn key(mut self, key: &str, value_type: ValueType) -> Self {
        self.keys.push((SeriesKey::from(key), value_type, Vec::new()));
        self
    }

    /// Adds a block declared as `[min, max]` that decodes to `timestamps`.
    pub fn block(self, min: Timestamp, max: Timestamp, timestamps: &[Timestamp]) -> Self {
        let value_type = self.current_type();
        let block = DecodedBlock::new(timestamps.to_vec(), values_for(value_type, timestamps.len()));
        self.push(min, max, StoredBlock::Decoded(block))
    }

    /// Adds a block that fails to decode.
    pub fn corrupt_block(self, min: Timestamp, max: Timestamp, reason: &str) -> Self {
        self.push(min, max, StoredBlock::Corrupt(reason.to_string()))
    }

    /// Adds a block whose read fails with an I/O error.
    pub fn unreadable_block(self, min: Timestamp, max: Timestamp) -> Self {
        self.push(min, max, StoredBlock::Unreadable)
    }

    /// Makes `entries` fail for `key`.
    pub fn break_entries(mut self, key: &str) -> Self {
        self.broken_entries = Some(SeriesKey::from(key));
        self
    }

    /// Offset of the `index`-th block of `key`.
    pub fn offset_of(&self, key: &str, index: usize) -> u64 {
        let key = SeriesKey::from(key);
        self.keys
            .iter()
            .find(|(k, _, _)| *k == key)
            .map(|(_, _, entries)| entries[index].offset)
            .unwrap()
    }

    fn current_type(&self) -> ValueType {
        self.keys.last().map(|(_, ty, _)| *ty).unwrap()
    }

    fn push(mut self, min: Timestamp, max: Timestamp, block: StoredBlock) -> Self {
        let offset = self.next_offset;
        self.next_offset += 100;
        self.keys
            .last_mut()
            .unwrap()
            .2
            .push(BlockIndexEntry::new(min, max, offset, 100));
        self.blocks.insert(offset, block);
        self
    }
}

impl BlockSource for MemorySource {
    fn time_range(&self) -> TimeBounds {
        self.range
    }

    fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn key_at(&self, ordinal: usize) -> Result<(SeriesKey, ValueType)> {
        self.keys
            .get(ordinal)
            .map(|(key, ty, _)| (key.clone(), *ty))
            .ok_or_else(|| TsmError::IndexDecode(format!("no key at {}", ordinal)))
    }

    fn entries(&self, key: &SeriesKey) -> Result<Vec<BlockIndexEntry>> {
        if self.broken_entries.as_ref() == Some(key) {
            return Err(TsmError::IndexDecode("entry list truncated".to_string()));
        }
        self.keys
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, _, entries)| entries.clone())
            .ok_or_else(|| TsmError::KeyNotFound(key.to_string()))
    }

    fn decode_block(&self, entry: &BlockIndexEntry, _value_type: ValueType) -> Result<DecodedBlock> {
        match self.blocks.get(&entry.offset) {
            Some(StoredBlock::Decoded(block)) => Ok(block.clone()),
            Some(StoredBlock::Corrupt(reason)) => Err(TsmError::BlockDecode {
                offset: entry.offset,
                reason: reason.clone(),
            }),
            Some(StoredBlock::Unreadable) | None => Err(TsmError::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read",
            ))),
        }
    }
}

/// A value column of `len` arbitrary values of `value_type`.
pub fn values_for(value_type: ValueType, len: usize) -> Values {
    match value_type {
        ValueType::Float => Values::Float((0..len).map(|i| i as f64 * 0.5).collect()),
        ValueType::Integer => Values::Integer((0..len as i64).collect()),
        ValueType::Unsigned => Values::Unsigned((0..len as u64).collect()),
        ValueType::Boolean => Values::Boolean((0..len).map(|i| i % 2 == 0).collect()),
        ValueType::String => Values::String((0..len).map(|i| format!("v{}", i)).collect()),
    }
}

/// Writes a file with one block per `(key, value_type, timestamps)` in order.
pub fn write_tsm(path: &Path, blocks: &[(&str, ValueType, &[Timestamp])]) -> Vec<BlockIndexEntry> {
    let mut writer = TsmWriter::new(path).unwrap();
    let entries = blocks
        .iter()
        .map(|(key, ty, timestamps)| {
            writer
                .write_block(&SeriesKey::from(*key), timestamps, &values_for(*ty, timestamps.len()))
                .unwrap()
                .unwrap()
        })
        .collect();
    writer.finish().unwrap();
    entries
}
