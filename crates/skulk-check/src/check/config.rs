//! Scan configuration.

use crate::tsm::{SeriesKey, Timestamp, ValueType, TSM_EXTENSION};
use std::path::PathBuf;

use super::locate::LocateQuery;

/// Default data root, relative to the working directory.
pub const DEFAULT_DATA_ROOT: &str = "data";

/// Configuration for a verification run.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Directory searched recursively for storage files.
    pub data_root: PathBuf,
    /// File extension to match, without the leading dot.
    pub extension: String,
    /// Restricts the walk to a single series key.
    pub target_key: Option<SeriesKey>,
    /// Verifies the whole-file checksum before walking keys.
    pub verify_checksum: bool,
    /// Timestamp to search for with the locator.
    pub locate_timestamp: Option<Timestamp>,
    /// Value type the locator searches. `None` searches every type.
    pub locate_value_type: Option<ValueType>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            extension: TSM_EXTENSION.to_string(),
            target_key: None,
            verify_checksum: true,
            locate_timestamp: None,
            locate_value_type: None,
        }
    }
}

impl CheckConfig {
    /// Creates a configuration scanning `data_root` with default settings.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Sets the file extension to match.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Restricts the walk to `key`.
    pub fn with_target_key(mut self, key: impl Into<SeriesKey>) -> Self {
        self.target_key = Some(key.into());
        self
    }

    /// Enables or disables whole-file checksum verification.
    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Sets the timestamp the locator searches for.
    pub fn with_locate_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.locate_timestamp = Some(timestamp);
        self
    }

    /// Restricts the locator to keys of `value_type`.
    pub fn with_locate_value_type(mut self, value_type: ValueType) -> Self {
        self.locate_value_type = Some(value_type);
        self
    }

    /// Returns the locator query, if a timestamp is configured.
    pub fn locate_query(&self) -> Option<LocateQuery> {
        self.locate_timestamp.map(|timestamp| LocateQuery {
            timestamp,
            value_type: self.locate_value_type,
        })
    }
}
