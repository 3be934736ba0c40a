//! TSM file format implementation.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  File Header (32 bytes)                                      │
//! │  - Magic: "ATSM" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 3                                │
//! │  - Min Timestamp: i64 (8 bytes)                              │
//! │  - Max Timestamp: i64 (8 bytes)                              │
//! │  - Key Count: u32 (4 bytes)                                  │
//! │  - Level: u16 (2 bytes)                                      │
//! │  - Reserved: 4 bytes                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Data Blocks (one or more per key)                           │
//! │  - Value type, encodings, timestamp and value columns, CRC  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Key Index                                                   │
//! │  - Per key: key bytes, value type, block entries             │
//! │  - Bloom filter over key bytes                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (48 bytes)                                           │
//! │  - Offsets, sizes, CRC, reverse magic                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys appear in the index in the order they were first written; that is
//! the ordinal order exposed by [`super::BlockSource::key_at`]. Block entries
//! for a key appear in the order the blocks were written.

use super::encoding::{self, CodecError};
use super::gorilla;
use super::{BlockIndexEntry, DecodedBlock, SeriesKey, Timestamp, ValueType, Values};
use crate::error::{Result, TsmError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension for TSM files, without the leading dot.
pub const TSM_EXTENSION: &str = "tsm";

/// Magic bytes for TSM file header: "ATSM"
pub const TSM_MAGIC: [u8; 4] = *b"ATSM";

/// Reverse magic bytes for TSM file footer: "MSTA"
pub const TSM_MAGIC_REVERSE: [u8; 4] = *b"MSTA";

/// Current TSM file format version.
pub const TSM_VERSION: u16 = 3;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 48;

/// Size of one encoded [`BlockIndexEntry`].
pub const INDEX_ENTRY_SIZE: usize = 28;

/// Fixed bytes in a data block besides the two columns.
pub const BLOCK_OVERHEAD: usize = 19;

/// Bounds-checked little-endian reader over a byte slice.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(N)?);
        Some(buf)
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        Some(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.array()?))
    }
}

/// Timestamp column encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimestampEncoding {
    /// Raw encoding (8 bytes × N, uncompressed).
    Raw = 0,
    /// Delta-of-Delta encoding (Gorilla timestamps).
    #[default]
    DeltaOfDelta = 1,
}

impl TimestampEncoding {
    /// Creates a TimestampEncoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::DeltaOfDelta),
            _ => None,
        }
    }
}

/// Value column encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueEncoding {
    /// Raw encoding (8 bytes × N, uncompressed). Fixed width types only.
    Raw = 0,
    /// Gorilla XOR compression. Floats only.
    GorillaXor = 1,
    /// Zig-zag delta varints. Integer and unsigned only.
    ZigZagVarint = 2,
    /// One bit per value. Booleans only.
    BitPacked = 3,
    /// `u32` length prefix per value. Strings only.
    LengthPrefixed = 4,
}

impl ValueEncoding {
    /// Creates a ValueEncoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::GorillaXor),
            2 => Some(Self::ZigZagVarint),
            3 => Some(Self::BitPacked),
            4 => Some(Self::LengthPrefixed),
            _ => None,
        }
    }

    /// Default encoding written for `value_type`.
    pub fn default_for(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Float => Self::GorillaXor,
            ValueType::Integer | ValueType::Unsigned => Self::ZigZagVarint,
            ValueType::Boolean => Self::BitPacked,
            ValueType::String => Self::LengthPrefixed,
        }
    }
}

/// TSM file header (32 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsmHeader {
    /// File format version.
    pub version: u16,
    /// Minimum timestamp advertised for the file.
    pub min_timestamp: i64,
    /// Maximum timestamp advertised for the file.
    pub max_timestamp: i64,
    /// Number of keys in the index.
    pub key_count: u32,
    /// Compaction level (0 = L0, 1 = L1, etc.).
    pub level: u16,
}

impl Default for TsmHeader {
    fn default() -> Self {
        Self {
            version: TSM_VERSION,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            key_count: 0,
            level: 0,
        }
    }
}

impl TsmHeader {
    /// Encodes the header using little-endian byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&TSM_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.min_timestamp.to_le_bytes());
        buf[14..22].copy_from_slice(&self.max_timestamp.to_le_bytes());
        buf[22..26].copy_from_slice(&self.key_count.to_le_bytes());
        buf[26..28].copy_from_slice(&self.level.to_le_bytes());
        // 28..32 reserved
        buf
    }

    /// Parses a header from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::InvalidMagic` if the magic bytes don't match and
    /// `TsmError::UnsupportedVersion` for versions newer than this crate.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let short = || TsmError::index(format!("header needs {} bytes", HEADER_SIZE));

        let magic = cursor.array::<4>().ok_or_else(short)?;
        if magic != TSM_MAGIC {
            return Err(TsmError::InvalidMagic(magic));
        }
        let version = cursor.u16().ok_or_else(short)?;
        if version > TSM_VERSION {
            return Err(TsmError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            min_timestamp: cursor.i64().ok_or_else(short)?,
            max_timestamp: cursor.i64().ok_or_else(short)?,
            key_count: cursor.u32().ok_or_else(short)?,
            level: cursor.u16().ok_or_else(short)?,
        })
    }
}

/// TSM file footer (48 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsmFooter {
    /// Offset to the key index from file start.
    pub index_offset: u64,
    /// Size of the key index in bytes.
    pub index_size: u32,
    /// Offset to the data section from file start.
    pub data_offset: u64,
    /// Size of the data section in bytes.
    pub data_size: u64,
    /// Total number of samples in the file.
    pub total_point_count: u64,
    /// CRC32 of everything before the footer.
    pub file_crc32: u32,
}

impl TsmFooter {
    /// Encodes the footer using little-endian byte order.
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.index_size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[20..28].copy_from_slice(&self.data_size.to_le_bytes());
        buf[28..36].copy_from_slice(&self.total_point_count.to_le_bytes());
        buf[36..40].copy_from_slice(&self.file_crc32.to_le_bytes());
        buf[40..44].copy_from_slice(&TSM_MAGIC_REVERSE);
        // 44..48 reserved
        buf
    }

    /// Parses a footer from exactly the last [`FOOTER_SIZE`] bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::InvalidMagic` if the reverse magic bytes don't match.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let short = || TsmError::index(format!("footer needs {} bytes", FOOTER_SIZE));

        let footer = Self {
            index_offset: cursor.u64().ok_or_else(short)?,
            index_size: cursor.u32().ok_or_else(short)?,
            data_offset: cursor.u64().ok_or_else(short)?,
            data_size: cursor.u64().ok_or_else(short)?,
            total_point_count: cursor.u64().ok_or_else(short)?,
            file_crc32: cursor.u32().ok_or_else(short)?,
        };
        let magic = cursor.array::<4>().ok_or_else(short)?;
        if magic != TSM_MAGIC_REVERSE {
            return Err(TsmError::InvalidMagic(magic));
        }
        Ok(footer)
    }
}

/// Default number of hash functions for the key Bloom filter.
const BLOOM_FILTER_DEFAULT_HASH_COUNT: u8 = 3;

/// Bloom filter for fast key existence checks.
///
/// `h_i(key) = xxhash64(key, seed=i) % size_bits` for `i` in `0..hash_count`.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u8,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at roughly 10 bits each.
    pub fn new(expected_items: usize) -> Self {
        let num_bits = (expected_items * 10).max(64);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            hash_count: BLOOM_FILTER_DEFAULT_HASH_COUNT,
        }
    }

    fn positions<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = (usize, u64)> + 'a {
        let num_bits = (self.bits.len() * 64) as u64;
        (0..self.hash_count).map(move |seed| {
            let bit_idx = xxhash_rust::xxh64::xxh64(key, u64::from(seed)) % num_bits;
            ((bit_idx / 64) as usize, 1u64 << (bit_idx % 64))
        })
    }

    /// Adds a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let positions: Vec<_> = self.positions(key).collect();
        for (word, mask) in positions {
            self.bits[word] |= mask;
        }
    }

    /// Returns false only if `key` is definitely absent.
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        self.bits.is_empty() || self.positions(key).all(|(word, mask)| self.bits[word] & mask != 0)
    }

    /// Appends the encoded filter to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&[self.hash_count, 0, 0, 0]);
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    pub(crate) fn read_from(cursor: &mut ByteCursor<'_>) -> Option<Self> {
        let num_words = cursor.u32()? as usize;
        let hash_count = cursor.u8()?;
        cursor.bytes(3)?;
        let raw = cursor.bytes(num_words.checked_mul(8)?)?;
        let bits = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Some(Self { bits, hash_count })
    }
}

impl BlockIndexEntry {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.min_time.to_le_bytes());
        out.extend_from_slice(&self.max_time.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }

    pub(crate) fn read_from(cursor: &mut ByteCursor<'_>) -> Option<Self> {
        Some(Self {
            min_time: cursor.i64()?,
            max_time: cursor.i64()?,
            offset: cursor.u64()?,
            size: cursor.u32()?,
        })
    }
}

/// Borrowed view of one encoded data block.
///
/// ## Binary Layout
///
/// ```text
/// Offset  Size    Field
/// ------  ----    -----
/// 0x00    1       value_type (u8)
/// 0x01    4       point_count (u32 LE)
/// 0x05    1       ts_encoding (u8)
/// 0x06    1       val_encoding (u8)
/// 0x07    4       ts_data_size (u32 LE)
/// 0x0B    N       ts_data[ts_data_size]
/// 0x0B+N  4       val_data_size (u32 LE)
/// 0x0F+N  M       val_data[val_data_size]
/// 0x0F+N+M 4      block_crc32 (u32 LE)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    /// Declared value type tag.
    pub value_type: u8,
    /// Number of samples in the block.
    pub point_count: u32,
    /// Timestamp encoding tag.
    pub ts_encoding: u8,
    /// Value encoding tag.
    pub val_encoding: u8,
    /// Encoded timestamp column.
    pub ts_data: &'a [u8],
    /// Encoded value column.
    pub val_data: &'a [u8],
}

impl<'a> BlockView<'a> {
    /// Splits block bytes into their fields and verifies the block CRC.
    ///
    /// `offset` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::BlockDecode` if the block is truncated, carries
    /// extra bytes, or fails its CRC check.
    pub fn parse(bytes: &'a [u8], offset: u64) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let truncated = || TsmError::block(offset, format!("block truncated at {} bytes", bytes.len()));

        let value_type = cursor.u8().ok_or_else(truncated)?;
        let point_count = cursor.u32().ok_or_else(truncated)?;
        let ts_encoding = cursor.u8().ok_or_else(truncated)?;
        let val_encoding = cursor.u8().ok_or_else(truncated)?;
        let ts_len = cursor.u32().ok_or_else(truncated)? as usize;
        let ts_data = cursor.bytes(ts_len).ok_or_else(truncated)?;
        let val_len = cursor.u32().ok_or_else(truncated)? as usize;
        let val_data = cursor.bytes(val_len).ok_or_else(truncated)?;
        let covered = cursor.position();
        let stored_crc = cursor.u32().ok_or_else(truncated)?;

        if cursor.position() != bytes.len() {
            return Err(TsmError::block(
                offset,
                format!("{} bytes after block CRC", bytes.len() - cursor.position()),
            ));
        }

        let actual = crc32fast::hash(&bytes[..covered]);
        if actual != stored_crc {
            return Err(TsmError::block(
                offset,
                format!("block checksum mismatch: expected {}, got {}", stored_crc, actual),
            ));
        }

        Ok(Self {
            value_type,
            point_count,
            ts_encoding,
            val_encoding,
            ts_data,
            val_data,
        })
    }

    /// Decodes both columns, dispatching on the declared value encoding.
    ///
    /// `expected` is the value type the index declares for the key; a block
    /// holding a different type is rejected.
    pub fn decode(&self, expected: ValueType, offset: u64) -> Result<DecodedBlock> {
        let fail = |reason: String| TsmError::block(offset, reason);
        let codec = |e: CodecError| TsmError::block(offset, e.to_string());

        let value_type = ValueType::from_u8(self.value_type)
            .ok_or_else(|| fail(format!("unknown value type {}", self.value_type)))?;
        if value_type != expected {
            return Err(fail(format!(
                "block holds {} values, index declares {}",
                value_type, expected
            )));
        }

        let count = self.point_count as usize;
        let timestamps = match TimestampEncoding::from_u8(self.ts_encoding) {
            Some(TimestampEncoding::DeltaOfDelta) => {
                gorilla::decode_timestamps(self.ts_data, count).map_err(codec)?
            }
            Some(TimestampEncoding::Raw) => encoding::decode_raw_words(self.ts_data, count)
                .map_err(codec)?
                .into_iter()
                .map(|w| w as i64)
                .collect(),
            None => return Err(fail(format!("unknown timestamp encoding {}", self.ts_encoding))),
        };

        let encoding = ValueEncoding::from_u8(self.val_encoding)
            .ok_or_else(|| fail(format!("unknown value encoding {}", self.val_encoding)))?;
        let data = self.val_data;
        let values = match (value_type, encoding) {
            (ValueType::Float, ValueEncoding::GorillaXor) => {
                Values::Float(gorilla::decode_floats(data, count).map_err(codec)?)
            }
            (ValueType::Float, ValueEncoding::Raw) => Values::Float(
                encoding::decode_raw_words(data, count)
                    .map_err(codec)?
                    .into_iter()
                    .map(f64::from_bits)
                    .collect(),
            ),
            (ValueType::Integer, ValueEncoding::ZigZagVarint) => {
                Values::Integer(encoding::decode_integers(data, count).map_err(codec)?)
            }
            (ValueType::Integer, ValueEncoding::Raw) => Values::Integer(
                encoding::decode_raw_words(data, count)
                    .map_err(codec)?
                    .into_iter()
                    .map(|w| w as i64)
                    .collect(),
            ),
            (ValueType::Unsigned, ValueEncoding::ZigZagVarint) => {
                Values::Unsigned(encoding::decode_unsigned(data, count).map_err(codec)?)
            }
            (ValueType::Unsigned, ValueEncoding::Raw) => {
                Values::Unsigned(encoding::decode_raw_words(data, count).map_err(codec)?)
            }
            (ValueType::Boolean, ValueEncoding::BitPacked) => {
                Values::Boolean(encoding::decode_booleans(data, count).map_err(codec)?)
            }
            (ValueType::String, ValueEncoding::LengthPrefixed) => {
                Values::String(encoding::decode_strings(data, count).map_err(codec)?)
            }
            (ty, enc) => return Err(fail(format!("{:?} encoding is invalid for {} blocks", enc, ty))),
        };

        Ok(DecodedBlock::new(timestamps, values))
    }
}

/// Encodes one block with the default encodings for its value type.
///
/// Timestamps use delta-of-delta unless a delta-of-delta does not fit in
/// 32 bits, in which case they are stored raw.
pub fn encode_block(timestamps: &[Timestamp], values: &Values) -> Vec<u8> {
    let value_type = values.value_type();
    let (ts_encoding, ts_data) = if gorilla::fits_delta_of_delta(timestamps) {
        (TimestampEncoding::DeltaOfDelta, gorilla::encode_timestamps(timestamps))
    } else {
        (
            TimestampEncoding::Raw,
            encoding::encode_raw_words(timestamps.iter().map(|&ts| ts as u64)),
        )
    };
    let val_data = match values {
        Values::Float(v) => gorilla::encode_floats(v),
        Values::Integer(v) => encoding::encode_integers(v),
        Values::Unsigned(v) => encoding::encode_unsigned(v),
        Values::Boolean(v) => encoding::encode_booleans(v),
        Values::String(v) => encoding::encode_strings(v),
    };

    let mut out = Vec::with_capacity(BLOCK_OVERHEAD + ts_data.len() + val_data.len());
    out.push(value_type as u8);
    out.extend_from_slice(&(timestamps.len() as u32).to_le_bytes());
    out.push(ts_encoding as u8);
    out.push(ValueEncoding::default_for(value_type) as u8);
    out.extend_from_slice(&(ts_data.len() as u32).to_le_bytes());
    out.extend_from_slice(&ts_data);
    out.extend_from_slice(&(val_data.len() as u32).to_le_bytes());
    out.extend_from_slice(&val_data);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Handle to a finished TSM file.
#[derive(Debug)]
pub struct TsmFileHandle {
    /// Path to the TSM file.
    pub path: PathBuf,
    /// The header of the file.
    pub header: TsmHeader,
    /// The footer of the file.
    pub footer: TsmFooter,
}

struct PendingKey {
    key: SeriesKey,
    value_type: ValueType,
    entries: Vec<BlockIndexEntry>,
}

/// TSM file writer.
///
/// Writes, in order:
/// 1. Header placeholder (32 bytes), rewritten on [`TsmWriter::finish`]
/// 2. Data blocks, in the order they are supplied
/// 3. Key index with Bloom filter
/// 4. Footer (48 bytes, with file CRC)
///
/// Blocks are neither sorted nor merged, so the index reflects exactly
/// what was written.
pub struct TsmWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    keys: Vec<PendingKey>,
    ordinals: HashMap<SeriesKey, usize>,
    body_crc: crc32fast::Hasher,
    min_timestamp: i64,
    max_timestamp: i64,
    total_point_count: u64,
    level: u16,
}

impl TsmWriter {
    /// Creates a new TSM writer for the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&TsmHeader::default().to_bytes())?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            position: HEADER_SIZE as u64,
            keys: Vec::new(),
            ordinals: HashMap::new(),
            body_crc: crc32fast::Hasher::new(),
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            total_point_count: 0,
            level: 0,
        })
    }

    /// Sets the compaction level for this file.
    pub fn set_level(&mut self, level: u16) {
        self.level = level;
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.body_crc.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Writes one block for `key` and records its index entry.
    ///
    /// The entry's bounds are the first and last supplied timestamps, as
    /// given. Returns `None` without writing anything for empty columns.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` I/O error if the columns differ in length,
    /// `key` was previously written with another value type, or the key or
    /// encoded block is too long for its length field.
    pub fn write_block(
        &mut self,
        key: &SeriesKey,
        timestamps: &[Timestamp],
        values: &Values,
    ) -> Result<Option<BlockIndexEntry>> {
        if timestamps.len() != values.len() {
            return Err(invalid_input(format!(
                "{} timestamps but {} values",
                timestamps.len(),
                values.len()
            )));
        }
        let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
            return Ok(None);
        };
        length_field::<u32>(timestamps.len(), "sample count")?;

        let value_type = values.value_type();
        let ordinal = match self.ordinals.get(key) {
            Some(&ordinal) if self.keys[ordinal].value_type != value_type => {
                return Err(invalid_input(format!(
                    "key {} was written as {}, not {}",
                    key, self.keys[ordinal].value_type, value_type
                )));
            }
            Some(&ordinal) => ordinal,
            None => {
                if u16::try_from(key.as_bytes().len()).is_err() {
                    return Err(invalid_input(format!(
                        "key of {} bytes exceeds {} byte limit",
                        key.as_bytes().len(),
                        u16::MAX
                    )));
                }
                self.keys.push(PendingKey {
                    key: key.clone(),
                    value_type,
                    entries: Vec::new(),
                });
                self.ordinals.insert(key.clone(), self.keys.len() - 1);
                self.keys.len() - 1
            }
        };

        let block = encode_block(timestamps, values);
        let size = u32::try_from(block.len())
            .map_err(|_| invalid_input(format!("block of {} bytes for {} is too large", block.len(), key)))?;
        let entry = BlockIndexEntry::new(first, last, self.position, size);
        self.append(&block)?;

        self.keys[ordinal].entries.push(entry);
        self.min_timestamp = self.min_timestamp.min(first);
        self.max_timestamp = self.max_timestamp.max(last);
        self.total_point_count += timestamps.len() as u64;

        Ok(Some(entry))
    }

    /// Finishes writing the TSM file and returns a handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any I/O operation fails.
    pub fn finish(mut self) -> Result<TsmFileHandle> {
        let data_offset = HEADER_SIZE as u64;
        let data_size = self.position - data_offset;

        let key_count = length_field::<u32>(self.keys.len(), "key count")?;
        let mut bloom = BloomFilter::new(self.keys.len());
        let mut index = Vec::new();
        index.extend_from_slice(&key_count.to_le_bytes());
        for pending in &self.keys {
            let key = pending.key.as_bytes();
            index.extend_from_slice(&length_field::<u16>(key.len(), "key length")?.to_le_bytes());
            index.extend_from_slice(key);
            index.push(pending.value_type as u8);
            index.extend_from_slice(&length_field::<u32>(pending.entries.len(), "entry count")?.to_le_bytes());
            for entry in &pending.entries {
                entry.write_to(&mut index);
            }
            bloom.insert(key);
        }
        bloom.write_to(&mut index);

        let index_size = length_field::<u32>(index.len(), "index size")?;
        let index_offset = self.position;
        self.append(&index)?;

        let header = TsmHeader {
            version: TSM_VERSION,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            key_count,
            level: self.level,
        };
        let header_bytes = header.to_bytes();

        let mut file_crc = crc32fast::Hasher::new();
        file_crc.update(&header_bytes);
        file_crc.combine(&self.body_crc);

        let footer = TsmFooter {
            index_offset,
            index_size,
            data_offset,
            data_size,
            total_point_count: self.total_point_count,
            file_crc32: file_crc.finalize(),
        };
        self.writer.write_all(&footer.to_bytes())?;

        // Seek to beginning and overwrite header with final values
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&header_bytes)?;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| io::Error::other(e.to_string()))?;
        file.sync_all()?;

        debug!(
            "Wrote {} with {} keys, {} points",
            self.path.display(),
            header.key_count,
            footer.total_point_count
        );

        Ok(TsmFileHandle {
            path: self.path,
            header,
            footer,
        })
    }
}

fn invalid_input(message: String) -> TsmError {
    TsmError::IoError(io::Error::new(io::ErrorKind::InvalidInput, message))
}

fn length_field<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| invalid_input(format!("{} {} does not fit its field", what, len)))
}
