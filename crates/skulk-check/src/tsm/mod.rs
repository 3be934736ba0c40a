//! TSM file format: series keys, block index entries and block decoding.
//!
//! A TSM file holds, for every series key, an ordered list of blocks. Each
//! block carries a timestamp column and a value column of the key's
//! [`ValueType`]. The key index maps every key to its [`BlockIndexEntry`]
//! list, which declares each block's time bounds and location.

pub mod encoding;
pub mod file;
pub mod gorilla;
pub mod reader;
pub mod source;

pub use file::{TsmFileHandle, TsmFooter, TsmHeader, TsmWriter, TSM_EXTENSION};
pub use reader::TsmReader;
pub use source::{BlockSource, ChecksumStatus};

use std::fmt;

/// Nanosecond timestamp.
pub type Timestamp = i64;

/// Identifier of one series: measurement, tag set and field, as raw bytes.
///
/// Keys are opaque to the checker; they are only compared for equality and
/// printed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey(Vec<u8>);

impl SeriesKey {
    /// Creates a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for SeriesKey {
    fn from(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }
}

impl From<&[u8]> for SeriesKey {
    fn from(key: &[u8]) -> Self {
        Self(key.to_vec())
    }
}

impl AsRef<[u8]> for SeriesKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Value type of a series, fixed per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// 64-bit IEEE 754 float.
    Float = 0,
    /// Signed 64-bit integer.
    Integer = 1,
    /// Boolean.
    Boolean = 2,
    /// UTF-8 string.
    String = 3,
    /// Unsigned 64-bit integer.
    Unsigned = 4,
}

impl ValueType {
    /// Creates a ValueType from its on-disk tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Float),
            1 => Some(Self::Integer),
            2 => Some(Self::Boolean),
            3 => Some(Self::String),
            4 => Some(Self::Unsigned),
            _ => None,
        }
    }

    /// Returns a short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Unsigned => "unsigned",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive time bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    /// Smallest timestamp.
    pub min: Timestamp,
    /// Largest timestamp.
    pub max: Timestamp,
}

impl TimeBounds {
    /// Creates bounds from `min` and `max`.
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        Self { min, max }
    }

    /// Returns true if `ts` lies within the bounds.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.min <= ts && ts <= self.max
    }

    /// Widens the bounds to cover `other`.
    pub fn merge(self, other: TimeBounds) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Index metadata for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    /// Declared first timestamp of the block.
    pub min_time: Timestamp,
    /// Declared last timestamp of the block.
    pub max_time: Timestamp,
    /// Byte offset of the block from file start.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u32,
}

impl BlockIndexEntry {
    /// Creates a new index entry.
    pub fn new(min_time: Timestamp, max_time: Timestamp, offset: u64, size: u32) -> Self {
        Self {
            min_time,
            max_time,
            offset,
            size,
        }
    }

    /// Returns the declared bounds.
    pub fn bounds(&self) -> TimeBounds {
        TimeBounds::new(self.min_time, self.max_time)
    }
}

/// A decoded value column.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    /// Float values.
    Float(Vec<f64>),
    /// Signed integer values.
    Integer(Vec<i64>),
    /// Boolean values.
    Boolean(Vec<bool>),
    /// String values.
    String(Vec<String>),
    /// Unsigned integer values.
    Unsigned(Vec<u64>),
}

impl Values {
    /// Returns the value type of the column.
    pub fn value_type(&self) -> ValueType {
        match self {
            Values::Float(_) => ValueType::Float,
            Values::Integer(_) => ValueType::Integer,
            Values::Boolean(_) => ValueType::Boolean,
            Values::String(_) => ValueType::String,
            Values::Unsigned(_) => ValueType::Unsigned,
        }
    }

    /// Number of values in the column.
    pub fn len(&self) -> usize {
        match self {
            Values::Float(v) => v.len(),
            Values::Integer(v) => v.len(),
            Values::Boolean(v) => v.len(),
            Values::String(v) => v.len(),
            Values::Unsigned(v) => v.len(),
        }
    }

    /// Returns true if the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parallel timestamp and value columns of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    /// Timestamps in stored order.
    pub timestamps: Vec<Timestamp>,
    /// Values, one per timestamp.
    pub values: Values,
}

impl DecodedBlock {
    /// Creates a block from its columns.
    pub fn new(timestamps: Vec<Timestamp>, values: Values) -> Self {
        Self { timestamps, values }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if the block has no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// First and last stored timestamps.
    pub fn first_last(&self) -> Option<(Timestamp, Timestamp)> {
        Some((*self.timestamps.first()?, *self.timestamps.last()?))
    }
}
