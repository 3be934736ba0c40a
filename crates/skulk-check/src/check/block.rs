//! Per-block validation of decoded columns against their index entry.

use super::anomaly::{Anomaly, Bound, Scope};
use crate::error::Result;
use crate::tsm::{BlockIndexEntry, BlockSource, DecodedBlock, SeriesKey, TimeBounds, ValueType};
use tracing::trace;

/// Result of checking one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCheck {
    /// True minimum and maximum decoded timestamps, `None` if the block was
    /// skipped.
    pub observed: Option<TimeBounds>,
    /// Number of decoded samples.
    pub point_count: usize,
    /// Anomalies found in this block, in check order.
    pub anomalies: Vec<Anomaly>,
}

/// Decodes blocks and validates their timestamps.
///
/// Every check runs independently; a failed bounds check does not suppress
/// the ordering checks and vice versa.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockChecker;

impl BlockChecker {
    /// Creates a checker.
    pub fn new() -> Self {
        Self
    }

    /// Decodes the block at `entry` as `value_type` and validates it.
    ///
    /// # Errors
    ///
    /// Decode failures become [`Anomaly::BlockDecode`]; only errors for
    /// which [`crate::TsmError::is_fatal_for_file`] holds are returned.
    pub fn check<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        key: &SeriesKey,
        value_type: ValueType,
        entry: &BlockIndexEntry,
    ) -> Result<BlockCheck> {
        match source.decode_block(entry, value_type) {
            Ok(block) => Ok(self.validate(key, entry, &block)),
            Err(e) if !e.is_fatal_for_file() => Ok(BlockCheck {
                anomalies: vec![Anomaly::BlockDecode {
                    key: key.clone(),
                    offset: entry.offset,
                    reason: e.to_string(),
                }],
                ..BlockCheck::default()
            }),
            Err(e) => Err(e),
        }
    }

    /// Validates an already decoded block against `entry`.
    pub fn validate(&self, key: &SeriesKey, entry: &BlockIndexEntry, block: &DecodedBlock) -> BlockCheck {
        let skipped = |reason: String| BlockCheck {
            anomalies: vec![Anomaly::BlockDecode {
                key: key.clone(),
                offset: entry.offset,
                reason,
            }],
            ..BlockCheck::default()
        };

        let Some((first, last)) = block.first_last() else {
            return skipped("block has no timestamps".to_string());
        };
        if block.values.len() != block.timestamps.len() {
            return skipped(format!(
                "{} timestamps but {} values",
                block.timestamps.len(),
                block.values.len()
            ));
        }

        let mut anomalies = Vec::new();
        let scope = || Scope::Block {
            key: key.clone(),
            offset: entry.offset,
        };

        if first != entry.min_time {
            anomalies.push(Anomaly::BoundsMismatch {
                scope: scope(),
                bound: Bound::Min,
                observed: first,
                expected: entry.min_time,
            });
        }
        if last != entry.max_time {
            anomalies.push(Anomaly::BoundsMismatch {
                scope: scope(),
                bound: Bound::Max,
                observed: last,
                expected: entry.max_time,
            });
        }

        if last < first {
            anomalies.push(Anomaly::InvertedSpan {
                key: key.clone(),
                offset: entry.offset,
                first,
                last,
            });
        }

        for (position, pair) in block.timestamps.windows(2).enumerate() {
            if pair[1] < pair[0] {
                anomalies.push(Anomaly::Monotonicity {
                    key: key.clone(),
                    offset: entry.offset,
                    position: position + 1,
                    value: pair[1],
                    previous: pair[0],
                });
            }
        }

        let (min, max) = block
            .timestamps
            .iter()
            .fold((first, first), |(min, max), &ts| (min.min(ts), max.max(ts)));

        trace!(
            "[BLOCK {} / {} values] MIN: {}, MAX: {}",
            entry.offset,
            block.len(),
            first,
            last
        );

        BlockCheck {
            observed: Some(TimeBounds::new(min, max)),
            point_count: block.len(),
            anomalies,
        }
    }
}
