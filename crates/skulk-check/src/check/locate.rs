//! Point lookup by exhaustive block scan.
//!
//! The locator decodes every block of every selected key rather than
//! trusting the index bounds, so it still finds samples that sit in blocks
//! whose entries are wrong.

use super::config::CheckConfig;
use super::discover::discover_files;
use crate::error::Result;
use crate::mmap::RegionManager;
use crate::tsm::{BlockSource, SeriesKey, Timestamp, TsmReader, ValueType};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateQuery {
    /// Timestamp to find.
    pub timestamp: Timestamp,
    /// Only keys of this value type are searched. `None` searches all keys.
    pub value_type: Option<ValueType>,
}

impl LocateQuery {
    /// Searches keys of every value type for `timestamp`.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            value_type: None,
        }
    }

    /// Restricts the search to keys of `value_type`.
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
}

/// One block holding the searched timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateMatch {
    /// Key owning the block.
    pub key: SeriesKey,
    /// File offset of the block.
    pub offset: u64,
    /// First decoded timestamp of the block.
    pub block_min: Timestamp,
    /// Last decoded timestamp of the block.
    pub block_max: Timestamp,
}

/// Finds the blocks that contain a timestamp.
#[derive(Debug, Clone, Default)]
pub struct Locator {
    manager: RegionManager,
}

impl Locator {
    /// Creates a locator with its own region manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a locator that maps files through `manager`.
    pub fn with_manager(manager: RegionManager) -> Self {
        Self { manager }
    }

    /// Opens the file at `path` and searches it.
    ///
    /// # Errors
    ///
    /// Returns any error that prevents the file from being opened or its
    /// key index from being read.
    pub fn locate_file(&self, path: &Path, query: &LocateQuery) -> Result<Vec<LocateMatch>> {
        let reader = TsmReader::open(&self.manager, path)?;
        let matches = self.locate(&reader, query)?;
        debug!(
            "{} block(s) in {} hold timestamp {}",
            matches.len(),
            path.display(),
            query.timestamp
        );
        reader.close()?;
        Ok(matches)
    }

    /// Searches every matching file under `config.data_root` for the
    /// configured timestamp.
    ///
    /// Only files with at least one match are returned, in path order. Files
    /// that cannot be opened are skipped with a warning. Without a
    /// configured timestamp nothing is searched.
    ///
    /// # Errors
    ///
    /// Returns an error only if the data root cannot be walked.
    pub fn locate_all(&self, config: &CheckConfig) -> Result<Vec<(PathBuf, Vec<LocateMatch>)>> {
        let Some(query) = config.locate_query() else {
            debug!("no locate timestamp configured");
            return Ok(Vec::new());
        };

        let files = discover_files(&config.data_root, &config.extension)?;
        info!(
            "Searching {} .{} files for timestamp {}",
            files.len(),
            config.extension,
            query.timestamp
        );

        let mut found = Vec::new();
        for path in files {
            match self.locate_file(&path, &query) {
                Ok(matches) if matches.is_empty() => {}
                Ok(matches) => found.push((path, matches)),
                Err(e) => warn!("Failed to search {}: {}", path.display(), e),
            }
        }
        Ok(found)
    }

    /// Searches every block of every selected key in `source`.
    ///
    /// Matches are returned in key ordinal order, then index order. A block
    /// holding the timestamp more than once yields a single match. Blocks
    /// that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if a key or its entry list cannot be read.
    pub fn locate<S: BlockSource + ?Sized>(&self, source: &S, query: &LocateQuery) -> Result<Vec<LocateMatch>> {
        let mut matches = Vec::new();

        for ordinal in 0..source.key_count() {
            let (key, value_type) = source.key_at(ordinal)?;
            if query.value_type.is_some_and(|wanted| wanted != value_type) {
                continue;
            }

            for entry in source.entries(&key)? {
                let block = match source.decode_block(&entry, value_type) {
                    Ok(block) => block,
                    Err(e) if !e.is_fatal_for_file() => {
                        warn!("skipping block {} of {}: {}", entry.offset, key, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if !block.timestamps.contains(&query.timestamp) {
                    continue;
                }
                if let Some((block_min, block_max)) = block.first_last() {
                    debug!(
                        "[BLOCK {} for Key {}] has timestamp {}. Block MIN: {}, MAX: {}",
                        entry.offset, key, query.timestamp, block_min, block_max
                    );
                    matches.push(LocateMatch {
                        key: key.clone(),
                        offset: entry.offset,
                        block_min,
                        block_max,
                    });
                }
            }
        }

        Ok(matches)
    }
}
